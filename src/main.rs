//! Interactive console for the optoplate controller.
//!
//! A thin line-oriented front end over the library: each console command
//! maps onto one registry/store/session operation and prints the reported
//! result. Run with `RUST_LOG=debug` to see every frame on the wire.

use anyhow::Result;
use clap::Parser;
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, BufReader};

use optoplate::{
    AssignmentRegistry, Color, ExperimentSession, LinkHandle, PersistenceStore, Protocol,
    Settings,
};

#[derive(Parser, Debug)]
#[command(name = "optoplate", about = "Well-plate illumination controller")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Serial port to open at startup (overrides configuration)
    #[arg(short, long)]
    port: Option<String>,
}

const HELP: &str = "\
Commands:
  create <name> <color> <intensity> <active> <silent> <on> <off> <total>
  assign <row> <col> <index>
  range <startRow> <startCol> <endRow> <endCol> <index>
  list
  save
  load
  reassign
  start <name>
  stop
  connect <port>
  help
  quit";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut settings = Settings::new(args.config.as_deref())?;
    if args.port.is_some() {
        settings.link.port = args.port.clone();
    }

    std::fs::create_dir_all(&settings.experiment.logs_dir)?;
    if let Some(parent) = settings.store.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let link = LinkHandle::disconnected();
    if let Some(port) = settings.link.port.clone() {
        connect(&link, &port, settings.link.baud_rate).await;
    }

    let mut registry = AssignmentRegistry::new(link.clone());
    let store = PersistenceStore::new(
        settings.store.path.clone(),
        link.clone(),
        settings.link.replay_delay(),
    );
    let mut session = ExperimentSession::new(link.clone(), &settings.experiment);

    println!("optoplate console. Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words: VecDeque<&str> = line.split_whitespace().collect();
        let Some(command) = words.pop_front() else {
            continue;
        };
        let result = match command {
            "help" => {
                println!("{HELP}");
                Ok(())
            }
            "quit" | "exit" => break,
            "create" => create_protocol(&mut registry, &mut words).await,
            "assign" => match (words.pop_front(), words.pop_front(), parse_index(&mut words)) {
                (Some(row), Some(col), Some(index)) => {
                    registry.assign_well(row, col, index).await
                }
                _ => usage("assign <row> <col> <index>"),
            },
            "range" => {
                let (sr, sc, er, ec) = (
                    words.pop_front(),
                    words.pop_front(),
                    words.pop_front(),
                    words.pop_front(),
                );
                match (sr, sc, er, ec, parse_index(&mut words)) {
                    (Some(sr), Some(sc), Some(er), Some(ec), Some(index)) => {
                        registry.assign_range(sr, sc, er, ec, index).await
                    }
                    _ => usage("range <startRow> <startCol> <endRow> <endCol> <index>"),
                }
            }
            "list" => {
                print_protocols(&registry);
                Ok(())
            }
            "save" => save_session(&store, &mut registry),
            "load" => match store.load().await {
                Ok(loaded) => {
                    println!("Loaded {} protocols from the store.", loaded.protocols.len());
                    registry.adopt(loaded);
                    Ok(())
                }
                Err(optoplate::PlateError::CorruptStore(e)) => {
                    // Recoverable: report it and carry on with an empty store.
                    println!("Warning: could not read the protocol store ({e}); treating it as empty.");
                    registry.adopt(optoplate::LoadResult::default());
                    Ok(())
                }
                Err(e) => Err(e),
            },
            "reassign" => registry.reassign_all(settings.link.replay_delay()).await,
            "start" => match words.pop_front() {
                Some(name) => session.start(name).await,
                None => usage("start <name>"),
            },
            "stop" => session.stop().await,
            "connect" => match words.pop_front() {
                Some(port) => {
                    connect(&link, port, settings.link.baud_rate).await;
                    Ok(())
                }
                None => usage("connect <port>"),
            },
            other => usage(&format!("unknown command '{other}'; type 'help'")),
        };
        if let Err(e) = result {
            println!("ERROR: {e}");
        }
    }

    // STOP reaches the device before the port closes.
    session.stop().await?;
    link.detach().await;
    Ok(())
}

fn usage(message: &str) -> optoplate::AppResult<()> {
    Err(optoplate::PlateError::Validation(message.to_string()))
}

fn parse_index(words: &mut VecDeque<&str>) -> Option<usize> {
    words.pop_front()?.parse().ok()
}

async fn create_protocol(
    registry: &mut AssignmentRegistry,
    words: &mut VecDeque<&str>,
) -> optoplate::AppResult<()> {
    let mut next = |label: &str| {
        words.pop_front().map(str::to_string).ok_or_else(|| {
            optoplate::PlateError::Validation(format!("Missing field '{label}'"))
        })
    };
    let name = next("name")?;
    let color: Color = next("color")?.parse()?;
    let parse_num = |label: &str, value: String| {
        value.parse::<f64>().map_err(|_| {
            optoplate::PlateError::Validation(format!(
                "Field '{label}' must be numeric, got '{value}'"
            ))
        })
    };
    let intensity_raw = next("intensity")?;
    let intensity: u8 = intensity_raw.parse().map_err(|_| {
        optoplate::PlateError::Validation(format!(
            "Field 'intensity' must be an integer 0-255, got '{intensity_raw}'"
        ))
    })?;
    let active = parse_num("active", next("active")?)?;
    let silent = parse_num("silent", next("silent")?)?;
    let pulse_on = parse_num("on", next("on")?)?;
    let pulse_off = parse_num("off", next("off")?)?;
    let total = parse_num("total", next("total")?)?;

    let index = registry
        .create_protocol(Protocol {
            name: name.clone(),
            color,
            intensity,
            active,
            silent,
            pulse_on,
            pulse_off,
            total,
        })
        .await?;
    println!("Created protocol '{name}' at index {index}.");
    Ok(())
}

fn print_protocols(registry: &AssignmentRegistry) {
    println!("--- Defined Protocols ---");
    for entry in registry.list_protocols() {
        let p = &entry.protocol;
        println!(
            "Index: {}, Name: {}, Color: {}, Intensity: {}, Active: {}s, Silent: {}s, \
             Pulse: {}s ON/{}s OFF, Total: {}s",
            entry.index, p.name, p.color, p.intensity, p.active, p.silent, p.pulse_on,
            p.pulse_off, p.total
        );
        if entry.assignments.is_empty() {
            println!("  -> No well assignments");
        } else {
            let wells: Vec<String> = entry.assignments.iter().map(|a| a.to_string()).collect();
            let hint = if entry.previously_assigned {
                " (choose 'reassign' to replay)"
            } else {
                ""
            };
            println!("  -> Assigned to: {}{}", wells.join(", "), hint);
        }
    }
}

fn save_session(
    store: &PersistenceStore,
    registry: &mut AssignmentRegistry,
) -> optoplate::AppResult<()> {
    let report = store.save(registry.session_protocols(), registry.session_assignments())?;
    for name in &report.skipped {
        println!("Skipping duplicate protocol name: {name}");
    }
    if report.nothing_to_save() {
        println!("No new protocols to save (all duplicates).");
    } else {
        println!(
            "Saved {} new protocols (total now: {}).",
            report.saved, report.total_on_disk
        );
        registry.clear_session();
    }
    Ok(())
}

async fn connect(link: &LinkHandle, port: &str, baud_rate: u32) {
    #[cfg(feature = "instrument_serial")]
    {
        match optoplate::SerialLink::open(port, baud_rate) {
            Ok(serial) => {
                link.attach(Box::new(serial)).await;
                println!("Connected to {port}");
            }
            Err(e) => println!("ERROR: Could not open port {port}: {e}"),
        }
    }
    #[cfg(not(feature = "instrument_serial"))]
    {
        let _ = (link, port, baud_rate);
        println!("ERROR: Serial support not enabled. Rebuild with --features instrument_serial");
    }
}
