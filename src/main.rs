use log::error;
use std::process::exit;

#[tokio::main]
async fn main() {
    match duty_watch::run().await {
        Ok(()) => exit(0),
        Err(e) => {
            error!("Duty watch failed: {}", e);
            eprintln!("{}", e);
            exit(1)
        }
    }
}
