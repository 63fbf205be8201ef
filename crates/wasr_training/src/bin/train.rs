use clap::Parser;
use wasr_training::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    let args = TrainArgs::parse();
    run_train(args)?;
    Ok(())
}
