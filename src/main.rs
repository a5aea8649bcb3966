use clap::Parser;
use docker2aci::cli::{Args, Runner};
use docker2aci::config::ConverterConfig;
use std::process;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let runner = Runner::new(args, ConverterConfig::from_env());

    match runner.run().await {
        Ok(id) => println!("{}", id),
        Err(e) => {
            runner.logger().error(&e.to_string());
            process::exit(1);
        }
    }
}
