// CLI modules
mod cli;

use clap::{Parser, Subcommand};
use cli::{
    args::Args, op::Op, Daemon, Feed, Follow, Health, Init, Peers, Publish, Unfollow, Version,
    Whoami,
};

command_enum! {
    (Daemon, Daemon),
    (Feed, Feed),
    (Follow, Follow),
    (Health, Health),
    (Init, Init),
    (Peers, Peers),
    (Publish, Publish),
    (Unfollow, Unfollow),
    (Version, Version),
    (Whoami, Whoami),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let ctx = cli::op::OpContext::new(args.config_path);

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
