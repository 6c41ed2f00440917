#[tokio::main]
async fn main() {
    if let Err(e) = haybot_lib::run().await {
        eprintln!("haybot: {e}");
        std::process::exit(1);
    }
}
