use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use nd_framework::FrameworkConfig;
use nd_logging::LogConfig;
use nd_provider::InterfaceId;
use nd_types::{AddressListView, NdError, QueryFlags, SockAddr, SOCKADDR_V6_LEN};

/// NetworkDirect Address List Utility
///
/// Lists the local RDMA-capable addresses registered with the provider
/// framework, and optionally probes them: resolve which local address
/// would reach a remote peer, or open an adapter for a listed address.
#[derive(Parser, Debug)]
#[command(name = "nd-addrlist", version, about)]
struct Args {
    /// Path to the framework configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Provider catalog path, overriding the configured one.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Leave v1 provider addresses out of the listing.
    #[arg(long)]
    exclude_v1: bool,

    /// Leave v2 provider addresses out of the listing.
    #[arg(long)]
    exclude_v2: bool,

    /// Resolve the local address that would reach this remote peer.
    #[arg(long, value_name = "ADDR")]
    resolve: Option<SocketAddr>,

    /// Open an adapter for this local address and report the result.
    #[arg(long, value_name = "ADDR")]
    open: Option<SocketAddr>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_config = LogConfig {
        level: if args.verbose { "debug".into() } else { "warn".into() },
        ..LogConfig::default()
    };
    let _guard = nd_logging::init_logging(&log_config);

    let mut config = match &args.config {
        Some(path) => FrameworkConfig::load(path)?,
        None => FrameworkConfig::default(),
    };
    if let Some(catalog) = &args.catalog {
        config.catalog_path = catalog.clone();
    }

    tracing::debug!(catalog = %config.catalog_path.display(), "Starting the provider framework");
    nd_framework::startup_with(&config)?;

    // Keep the instance alive for the whole run, whatever the probes return.
    let result = run(&args);
    nd_framework::cleanup()?;
    result
}

fn run(args: &Args) -> anyhow::Result<()> {
    let mut total = 0;
    if !args.exclude_v2 {
        total += list_generation("v2", QueryFlags::EXCLUDE_V1)?;
    }
    if !args.exclude_v1 {
        total += list_generation("v1", QueryFlags::EXCLUDE_V2)?;
    }
    if total == 0 {
        println!("no RDMA-capable addresses are registered");
    }

    if let Some(remote) = args.resolve {
        resolve(remote)?;
    }
    if let Some(local) = args.open {
        open(local)?;
    }
    Ok(())
}

/// Print every address one provider generation serves, tagged with its label.
fn list_generation(label: &str, flags: QueryFlags) -> anyhow::Result<usize> {
    let buf = match fetch_list(flags)? {
        Some(buf) => buf,
        None => return Ok(0),
    };
    let view = AddressListView::parse(&buf)?;
    for addr in view.addrs() {
        let addr = addr?;
        println!("{label}  {}", addr.to_socket_addr());
    }
    Ok(view.len())
}

/// Query with no buffer to learn the required size, then fetch for real.
/// Returns None when no addresses match the flags.
fn fetch_list(flags: QueryFlags) -> anyhow::Result<Option<Vec<u8>>> {
    match nd_framework::query_address_list(flags, None) {
        Ok(_) => Ok(None),
        Err(NdError::BufferOverflow { required }) => {
            let mut buf = vec![0u8; required];
            let written = nd_framework::query_address_list(flags, Some(&mut buf))?;
            buf.truncate(written);
            Ok(Some(buf))
        }
        Err(err) => Err(err.into()),
    }
}

fn resolve(remote: SocketAddr) -> anyhow::Result<()> {
    let remote = SockAddr::from_socket_addr(&remote);
    let mut out = [0u8; SOCKADDR_V6_LEN];
    let written = nd_framework::resolve_address(remote.as_bytes(), &mut out)?;
    let local = SockAddr::from_bytes(&out[..written])?;
    println!(
        "local address for {}: {}",
        remote.to_socket_addr(),
        local.to_socket_addr()
    );
    Ok(())
}

fn open(local: SocketAddr) -> anyhow::Result<()> {
    let local = SockAddr::from_socket_addr(&local);
    match nd_framework::open_adapter(InterfaceId::AdapterV2, local.as_bytes()) {
        Ok(_adapter) => {
            println!("opened a v2 adapter for {}", local.to_socket_addr());
            return Ok(());
        }
        Err(err) => {
            tracing::debug!("No v2 adapter for {}: {}", local.to_socket_addr(), err);
        }
    }
    let _adapter = nd_framework::open_v1_adapter(local.as_bytes())?;
    println!("opened a v1 adapter for {}", local.to_socket_addr());
    Ok(())
}
