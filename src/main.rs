mod cli;

use std::error::Error;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use crossbeam_channel::{Sender, select, unbounded};
use log::{error, info, warn};

use sessionwatch::{
    Command, ConfigSource, Event, EventBus, EventKind, PcapOpener, SessionController,
    SettingsStore, YamlScriptParser, list_devices,
};

use cli::Cli;

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let store = SettingsStore::open(&cli.config)?.with_overrides(cli.interface, cli.filter);

    env_logger::Builder::new()
        .parse_filters(&store.settings().log_level)
        .init();

    info!("Loaded configuration from '{}'", store.path().display());
    if store.capture_interface().is_none() {
        warn!("capture_interface is not set; available devices:");
        match list_devices() {
            Ok(devices) if !devices.is_empty() => {
                for (i, device) in devices.iter().enumerate() {
                    println!("[{}] {}", i, device);
                }
            }
            Ok(_) => {
                error!("No network devices found. Try running with sudo or as an administrator")
            }
            Err(e) => error!("Could not list devices: {}", e),
        }
    }

    let bus = EventBus::new();
    spawn_printer(&bus);

    let mut controller = SessionController::new(
        Box::new(store),
        Arc::new(YamlScriptParser),
        Arc::new(PcapOpener),
        bus.clone(),
    );
    controller.initialize();

    let (tx, rx) = unbounded::<Command>();
    spawn_stdin_reader(tx, bus);

    println!("Commands: start | stop | toggle | clear | reload | status | save <path> | quit");
    controller.run(&rx);
    info!("Bye.");
    Ok(())
}

/// Prints results and lifecycle notifications as they are published.
fn spawn_printer(bus: &EventBus) {
    let results = bus.subscribe(EventKind::ResultAdded);
    let errors = bus.subscribe(EventKind::Error);
    let loaded = bus.subscribe(EventKind::SessionLoaded);
    thread::spawn(move || {
        loop {
            select! {
                recv(results) -> event => match event {
                    Ok(Event::ResultAdded { result }) => {
                        println!(
                            "\n[{}] {} via {}",
                            result.sequence, result.site, result.handler_id
                        );
                        for (name, value) in &result.identity {
                            println!("    {} = {}", name, value);
                        }
                    }
                    Ok(_) => {}
                    Err(_) => break,
                },
                recv(errors) -> event => match event {
                    Ok(Event::Error { error }) => eprintln!("Error: {}", error),
                    Ok(_) => {}
                    Err(_) => break,
                },
                recv(loaded) -> event => match event {
                    Ok(_) => println!("Session cleared."),
                    Err(_) => break,
                },
            }
        }
    });
}

/// Turns operator input into commands. `reload` is announced on the bus as
/// a handler-script change rather than sent as a command.
fn spawn_stdin_reader(tx: Sender<Command>, bus: EventBus) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            let command = match line.split_once(' ') {
                Some(("save", path)) => Command::Save(path.trim().to_string()),
                _ => match line {
                    "start" => Command::Start,
                    "stop" => Command::Stop,
                    "toggle" => Command::Toggle,
                    "clear" => Command::Clear,
                    "status" => Command::Status,
                    "quit" | "exit" => Command::Quit,
                    "reload" => {
                        bus.publish(Event::ScriptsChanged);
                        continue;
                    }
                    "" => continue,
                    other => {
                        eprintln!("Unknown command '{}'", other);
                        continue;
                    }
                },
            };
            let quit = command == Command::Quit;
            if tx.send(command).is_err() || quit {
                return;
            }
        }
        // stdin closed: stop the controller.
        let _ = tx.send(Command::Quit);
    });
}
