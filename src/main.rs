use clap::Parser;
use tracing::{event, Level};

mod args;
mod error;
mod libs;

use libs::Rescheduler;

// fixture builders for tests
#[cfg(test)]
pub(crate) mod test_utilities;

/// The spot rescheduler
#[tokio::main]
async fn main() {
    // install a crypto provider for rustls
    // Rustls will complain if this is not run but we can ignore any errors
    // https://github.com/rustls/rustls/issues/1938
    let _ = rustls::crypto::ring::default_provider().install_default();
    // get command line args
    let args = args::Args::parse();
    // setup our tracer
    libs::trace::setup();
    // refuse to start on malformed node labels
    if let Err(error) = libs::nodes::NodeSelectors::parse(
        &args.on_demand_node_label,
        &args.spot_node_label,
    ) {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
    event!(Level::INFO, msg = "Running rescheduler");
    // serve metrics on the side; a dead listener is fatal
    let listen = args.listen_address.clone();
    tokio::spawn(async move {
        if let Err(error) = libs::metrics::serve(&listen).await {
            event!(Level::ERROR, error = error.to_string(), msg = "Failed to start metrics");
            std::process::exit(1);
        }
    });
    // build the rescheduler, failing fast if the cluster is unreachable
    let mut rescheduler = match Rescheduler::new(args).await {
        Ok(rescheduler) => rescheduler,
        Err(error) => {
            event!(
                Level::ERROR,
                error = error.to_string(),
                msg = "Failed to create rescheduler"
            );
            std::process::exit(1);
        }
    };
    // run until signalled to stop
    if let Err(error) = rescheduler.start().await {
        event!(Level::ERROR, error = error.to_string(), msg = "Rescheduler crashed");
        std::process::exit(1);
    }
}
