//! Credential Commands

use anyhow::{bail, Result};
use clap::Subcommand;
use fleetreg_common::{RegistryClient, RegistrationState};
use serde::Serialize;

use crate::output::{print_item, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum CredentialCommands {
    /// Show the stored credential of a client
    Show {
        /// Client name
        name: String,

        /// Print the password instead of masking it
        #[arg(long)]
        reveal: bool,
    },

    /// Forget the stored credential of a client
    Remove {
        /// Client name
        name: String,
    },
}

#[derive(Serialize)]
struct CredentialDisplay {
    name: String,
    state: RegistrationState,
    username: String,
    password: String,
}

impl TableDisplay for CredentialDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "State", "Username", "Password"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.state.to_string(),
            self.username.clone(),
            self.password.clone(),
        ]
    }
}

pub async fn execute(
    service: &RegistryClient,
    cmd: CredentialCommands,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        CredentialCommands::Show { name, reveal } => {
            let state = service.registration_state(&name).await?;
            let Some(credential) = service.get_credential(&name).await? else {
                bail!("no credential stored for '{}' ({})", name, state);
            };

            let password = if reveal {
                credential.password
            } else {
                "*".repeat(8)
            };
            print_item(
                &CredentialDisplay {
                    name,
                    state,
                    username: credential.username,
                    password,
                },
                format,
            );
        }
        CredentialCommands::Remove { name } => {
            if service.remove_credential(&name).await? {
                print_success(&format!("Credential for '{}' removed", name));
            } else {
                print_warning(&format!("No credential stored for '{}'", name));
            }
        }
    }

    Ok(())
}
