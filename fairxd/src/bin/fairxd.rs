use anyhow::{bail, Context as _};
use fairx_lib::CommitmentService;
use fairxd::{
    encryption::IdentityCopy,
    exchange,
    gate::ExchangeOffer,
    process,
    session::Handler,
    Config, ExchangeCoordinator, Listener, Party,
};
use std::{path::PathBuf, sync::Arc};
use structopt::StructOpt;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(StructOpt, Debug)]
struct Args {
    /// set log levels
    ///
    /// useful for trying to debug some operations happening
    /// while executing some of the commands
    #[structopt(long = "log-level", default_value = "info", global = true)]
    log_level: Level,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// print the example configuration to the standard output
    DefaultConfig,

    /// run the attestable service of a role until CTRL-C
    Serve {
        /// path of the configuration file of the role
        #[structopt(long = "config")]
        config: PathBuf,

        /// file handed over to peers sending an `EXCHANGE_FILE` command
        #[structopt(long = "exchange-file")]
        exchange_file: Option<PathBuf>,
    },

    /// have a file encrypted by the role's attestable service
    Encrypt {
        #[structopt(long = "config")]
        config: PathBuf,

        file: PathBuf,
    },

    /// generate and persist the role's commitment to a file
    Commit {
        #[structopt(long = "config")]
        config: PathBuf,

        file: PathBuf,
    },

    /// check a file against a persisted commitment
    Verify {
        #[structopt(long = "config")]
        config: PathBuf,

        /// defaults to the commitment received from the counterpart
        #[structopt(long = "commitment")]
        commitment: Option<PathBuf>,

        file: PathBuf,
    },

    /// exchange the encrypted files of two roles
    Exchange {
        /// configuration of the role listening for the exchange
        #[structopt(long = "receiver")]
        receiver: PathBuf,

        #[structopt(long = "receiver-file")]
        receiver_file: PathBuf,

        /// configuration of the role connecting to the receiver
        #[structopt(long = "sender")]
        sender: PathBuf,

        #[structopt(long = "sender-file")]
        sender_file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    if let Err(error) = main_run().await {
        eprintln!("{:?}", error);
        std::process::exit(1);
    }
}

async fn main_run() -> anyhow::Result<()> {
    let args = Args::from_args();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    match args.command {
        Command::DefaultConfig => {
            println!("{}", Config::EXAMPLE);
        }
        Command::Serve {
            config,
            exchange_file,
        } => {
            let config = Config::from_file(config).context("cannot load initial settings")?;
            let mut handler = Handler::new(&config);
            if let Some(file) = exchange_file {
                handler = handler.with_exchange(ExchangeOffer::new(file));
            }
            let listener = Listener::bind(&config, handler)
                .await
                .context("Cannot start the listener")?;

            println!("listening on {}, ctrl-c to stop...", listener.local_address());

            tokio::signal::ctrl_c()
                .await
                .context("Cannot wait for CTRL-C")?;
            tracing::info!("shuting down via CTRL-C instruction");

            listener
                .shutdown()
                .await
                .context("Cannot shutdown the listener")?;
        }
        Command::Encrypt { config, file } => {
            let config = Config::from_file(config).context("cannot load initial settings")?;
            let encrypted = process::encrypt_file(&config, &file, Arc::new(IdentityCopy)).await?;
            println!("{}", encrypted.display());
        }
        Command::Commit { config, file } => {
            let config = Config::from_file(config).context("cannot load initial settings")?;
            let service = CommitmentService::new(&config.name, config.storage().verification());
            let commitment = service.generate_commitment(&file).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&commitment).context("Cannot print commitment")?
            );
        }
        Command::Verify {
            config,
            commitment,
            file,
        } => {
            let config = Config::from_file(config).context("cannot load initial settings")?;
            let valid = match commitment {
                Some(commitment) => {
                    let service =
                        CommitmentService::new(&config.name, config.storage().verification());
                    let commitment = service.load_commitment(&commitment).await?;
                    service.verify_commitment(&file, &commitment).await
                }
                None => exchange::verify_received_file(&config, &file).await?,
            };
            if !valid {
                bail!("{} does not match its commitment", file.display());
            }
            println!("{} matches its commitment", file.display());
        }
        Command::Exchange {
            receiver,
            receiver_file,
            sender,
            sender_file,
        } => {
            let receiver = Config::from_file(receiver).context("cannot load receiver settings")?;
            let sender = Config::from_file(sender).context("cannot load sender settings")?;

            let (progress, mut states) = tokio::sync::mpsc::channel(8);
            let printer = tokio::spawn(async move {
                while let Some(state) = states.recv().await {
                    println!("{:?}", state);
                }
            });

            let result = ExchangeCoordinator::new(
                Party::new(receiver, receiver_file),
                Party::new(sender, sender_file),
            )
            .with_progress(progress)
            .run()
            .await;
            if let Err(error) = printer.await {
                tracing::debug!(reason = %error, "progress printer stopped early");
            }
            let report = result?;

            println!(
                "{} received {}",
                report.receiver_commitment.owner,
                report.received_by_receiver.display()
            );
            println!(
                "{} received {}",
                report.sender_commitment.owner,
                report.received_by_sender.display()
            );
        }
    }

    Ok(())
}
