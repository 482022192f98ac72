//! Starts one CFDP entity on a UDP socket. The entity serves a local directory and can
//! optionally put a file to the remote entity.
//!
//! Two instances can talk to each other:
//!
//! ```sh
//! cargo run --example udp-entity -- --local-id 2 --port 5222 --remote-id 1 --remote-port 5111
//! cargo run --example udp-entity -- --local-id 1 --port 5111 --remote-id 2 --remote-port 5222 \
//!     --put /hello.txt /copy.txt --mode ack
//! ```
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cfdp::entity::CfdpEntity;
use cfdp::filestore::NativeFilestore;
use cfdp::pdu::{ChecksumType, TransmissionMode};
use cfdp::request::PutRequest;
use cfdp::transport::UdpTransport;
use cfdp::user::LoggingUser;
use cfdp::{EntityConfig, RemoteEntityConfig, StdRemoteEntityConfigProvider};
use clap::Parser;
use log::{info, warn};

const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Info;

#[derive(Debug, Copy, Clone, clap::ValueEnum)]
pub enum TransmissionModeCli {
    Nak,
    Ack,
}

impl From<TransmissionModeCli> for TransmissionMode {
    fn from(mode: TransmissionModeCli) -> Self {
        match mode {
            TransmissionModeCli::Nak => TransmissionMode::Unacknowledged,
            TransmissionModeCli::Ack => TransmissionMode::Acknowledged,
        }
    }
}

#[derive(clap::Parser)]
#[command(about = "CFDP entity on a UDP socket")]
pub struct Cli {
    #[arg(long, default_value_t = 1)]
    local_id: u64,
    #[arg(long, default_value_t = 5111)]
    port: u16,
    #[arg(long, default_value_t = 2)]
    remote_id: u64,
    #[arg(long, default_value_t = 5222)]
    remote_port: u16,
    #[arg(long, help = "Filestore root, defaults to the current directory")]
    root: Option<PathBuf>,
    #[arg(
        long,
        num_args = 2,
        value_names = ["SOURCE", "DEST"],
        help = "Put a file to the remote entity"
    )]
    put: Option<Vec<String>>,
    #[arg(short, long, default_value = "nak")]
    mode: TransmissionModeCli,
    #[arg(short, long)]
    closure_requested: Option<bool>,
    #[arg(long, default_value_t = 60, help = "Run time in seconds")]
    duration: u64,
}

fn main() {
    let cli = Cli::parse();
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                std::thread::current().name().unwrap_or("main"),
                record.level(),
                message
            ))
        })
        .level(LOG_LEVEL)
        .chain(std::io::stdout())
        .apply()
        .unwrap();

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().expect("current directory is not accessible"),
    };
    let local_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), cli.port);
    let remote_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), cli.remote_port);
    let transport = Arc::new(UdpTransport::bind(local_addr).expect("binding UDP socket failed"));
    transport.connect(remote_addr);

    let mut remote_cfg = StdRemoteEntityConfigProvider::default();
    remote_cfg.0.insert(
        cli.remote_id,
        RemoteEntityConfig::new_with_default_values(
            cli.remote_id,
            false,
            cli.mode.into(),
            ChecksumType::Modular,
        ),
    );
    let entity = CfdpEntity::new(
        EntityConfig::new(cli.local_id),
        remote_cfg,
        NativeFilestore::new(&root),
        transport.clone(),
        LoggingUser,
    )
    .expect("starting entity failed");
    let handler = entity.pdu_handler();
    transport
        .start_indication(Box::new(move |raw_pdu| handler.indication(raw_pdu)))
        .expect("starting UDP receiver failed");
    info!(
        "entity {} listening on {local_addr}, serving {}",
        cli.local_id,
        root.display()
    );

    let transaction = cli.put.as_deref().map(|files| {
        let request = PutRequest::new_regular_request(
            cli.remote_id,
            &files[0],
            &files[1],
            Some(cli.mode.into()),
            cli.closure_requested,
        )
        .expect("invalid put request");
        entity.put(request).expect("put request failed")
    });

    let deadline = Instant::now() + Duration::from_secs(cli.duration);
    while Instant::now() < deadline {
        if let Some(id) = transaction {
            if entity.is_complete(id) {
                info!("transaction {id} completed");
                break;
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
    if let Some(id) = transaction.filter(|id| !entity.is_complete(*id)) {
        warn!("transaction {id} did not complete in time");
    }
    entity.shutdown();
    transport.unbind();
}
