//! Client Commands

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use fleetreg_common::{
    FleetEntry, ProvisioningRecord, Registration, RegistryClient, RemovalReport,
    SessionTermination,
};
use serde::Serialize;
use std::path::PathBuf;

use crate::output::{
    format_bytes, print_error, print_info, print_item, print_list, print_success, print_value,
    print_warning, OutputFormat, TableDisplay,
};

#[derive(Args)]
pub struct AddArgs {
    /// Client name (also the certificate common name)
    pub name: String,
}

#[derive(Args)]
pub struct RemoveArgs {
    /// Client name
    pub name: String,
}

#[derive(Args)]
pub struct BundleArgs {
    /// Client name
    pub name: String,

    /// Write the bundle as JSON to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct RegisterArgs {
    /// Client name (system id reported by the device)
    pub name: String,

    /// Device login user
    #[arg(short, long)]
    pub username: String,

    /// Device login password
    #[arg(short, long, env = "FLEETREG_DEVICE_PASSWORD")]
    pub password: String,
}

/// Fleet entry display wrapper for serialization
#[derive(Serialize)]
pub struct ClientDisplay {
    pub name: String,
    pub address: String,
    pub netmask: String,
    pub registered: bool,
    pub connected: bool,
    pub real_address: String,
    pub received: String,
    pub sent: String,
    pub connected_since: String,
}

impl From<&FleetEntry> for ClientDisplay {
    fn from(entry: &FleetEntry) -> Self {
        let (address, netmask) = entry
            .provisioning
            .as_ref()
            .map(|p| (p.address.to_string(), p.netmask.to_string()))
            .unwrap_or_default();

        let session = entry.session.as_ref();
        Self {
            name: entry.name.clone(),
            address,
            netmask,
            registered: entry.registered,
            connected: session.is_some(),
            real_address: session.map(|s| s.real_address.clone()).unwrap_or_default(),
            received: session.map(|s| format_bytes(s.bytes_received)).unwrap_or_default(),
            sent: session.map(|s| format_bytes(s.bytes_sent)).unwrap_or_default(),
            connected_since: session
                .map(|s| s.connected_since.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
        }
    }
}

impl TableDisplay for ClientDisplay {
    fn headers() -> Vec<&'static str> {
        vec![
            "Name", "Address", "Netmask", "Registered", "Connected", "Remote", "Received",
            "Sent", "Since",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.address.clone(),
            self.netmask.clone(),
            if self.registered {
                "yes".green().to_string()
            } else {
                "waiting".yellow().to_string()
            },
            if self.connected {
                "online".green().to_string()
            } else {
                "offline".dimmed().to_string()
            },
            self.real_address.clone(),
            self.received.clone(),
            self.sent.clone(),
            self.connected_since.clone(),
        ]
    }
}

/// Provisioning record display wrapper
#[derive(Serialize)]
pub struct RecordDisplay {
    pub name: String,
    pub address: String,
    pub netmask: String,
}

impl From<ProvisioningRecord> for RecordDisplay {
    fn from(record: ProvisioningRecord) -> Self {
        Self {
            name: record.name,
            address: record.address.to_string(),
            netmask: record.netmask.to_string(),
        }
    }
}

impl TableDisplay for RecordDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Address", "Netmask"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.address.clone(), self.netmask.clone()]
    }
}

impl TableDisplay for RemovalReport {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Session", "Revoked", "Record Removed", "Waiting Discarded"]
    }

    fn row(&self) -> Vec<String> {
        let session = match self.session {
            SessionTermination::Terminated => "terminated",
            SessionTermination::NotConnected => "not connected",
            SessionTermination::Failed => "failed",
        };
        vec![
            self.name.clone(),
            session.to_string(),
            self.certificate_revoked.to_string(),
            self.record_removed.to_string(),
            self.waiting_entry_discarded.to_string(),
        ]
    }
}

pub async fn list(service: &RegistryClient, format: OutputFormat) -> Result<()> {
    let view = service.list_fleet().await?;

    if let OutputFormat::Json | OutputFormat::Yaml = format {
        print_value(&view, format);
        return Ok(());
    }

    if let Some(report) = &view.sessions_unavailable {
        print_warning(&format!("Live sessions unavailable ({}): {}", report.kind, report.message));
    }
    let displays: Vec<ClientDisplay> = view.clients.iter().map(ClientDisplay::from).collect();
    print_list(&displays, format);

    let online = view.clients.iter().filter(|c| c.session.is_some()).count();
    print_info(&format!(
        "{} client(s), {} online, {} address(es) free in {}",
        view.clients.len(),
        online,
        view.free_addresses,
        view.network
    ));
    Ok(())
}

pub async fn add(service: &RegistryClient, args: AddArgs, format: OutputFormat) -> Result<()> {
    let record = service.add_client(&args.name).await?;
    print_success(&format!("Client '{}' provisioned", record.name));
    print_item(&RecordDisplay::from(record), format);
    Ok(())
}

pub async fn remove(service: &RegistryClient, args: RemoveArgs, format: OutputFormat) -> Result<()> {
    let report = service.remove_client(&args.name).await?;

    if report.is_clean() {
        print_success(&format!("Client '{}' removed", report.name));
    } else {
        for error in &report.errors {
            print_error(&format!("{}: {}", error.kind, error.message));
        }
        print_warning(&format!("Client '{}' removed with errors", report.name));
    }
    print_item(&report, format);
    Ok(())
}

pub async fn bundle(service: &RegistryClient, args: BundleArgs, format: OutputFormat) -> Result<()> {
    let bundle = service.get_connection_bundle(&args.name).await?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, serde_json::to_vec_pretty(&bundle)?)?;
            print_success(&format!("Bundle for '{}' written to {}", args.name, path.display()));
        }
        None => print_value(&bundle, format),
    }
    Ok(())
}

pub async fn register(service: &RegistryClient, args: RegisterArgs, format: OutputFormat) -> Result<()> {
    let registration = service
        .self_register(&args.name, &args.username, &args.password)
        .await?;

    match &registration {
        Registration::Pending => {
            // Parked in fleetregd's memory; a daemon restart drops it
            print_info(&format!(
                "'{}' is not provisioned yet; registration queued until it is added",
                args.name
            ));
        }
        Registration::Provisioned { credential_accepted, .. } => {
            if !credential_accepted {
                print_warning("Stored credential belongs to another user and was kept");
            }
            print_value(&registration, format);
        }
    }
    Ok(())
}
