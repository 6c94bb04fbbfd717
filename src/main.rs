use anyhow::Context;
use embassy_executor::Spawner;
use embassy_futures::join::join;
use log::{error, info};
use xadow_link::runtime::{run, EventChannel, TimerQueue};
use xadow_link::strap::{accessory_task, Presenter, SimulatedStrap, TransportError};
use xadow_link::system::config::LinkConfig;
use xadow_link::{AttributeId, ConnectionState, DecodedReadings, StrapController};

static EVENTS: EventChannel = EventChannel::new();

/// Logs what a watch face would display.
struct LogPresenter;

impl Presenter for LogPresenter {
    fn connection_changed(&mut self, state: ConnectionState) {
        info!("Status: {}", state);
    }

    fn readings_updated(&mut self, readings: &DecodedReadings) {
        info!("\n{}", readings);
    }

    fn write_acknowledged(
        &mut self,
        attribute: AttributeId,
        result: Result<(), TransportError>,
    ) {
        match result {
            Ok(()) => info!("Write to {} done", attribute),
            Err(e) => error!("Write to {} failed: {}", attribute, e),
        }
    }
}

fn load_config() -> anyhow::Result<LinkConfig> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(LinkConfig::default());
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config = LinkConfig::from_json(&text)
        .with_context(|| format!("Failed to parse config file {}", path))?;
    info!("Loaded link configuration from {}", path);
    Ok(config)
}

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting Xadow strap link");

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return;
        }
    };

    let strap = SimulatedStrap::new(&EVENTS);

    let created = StrapController::new(&config, strap, TimerQueue::new(), LogPresenter);
    let mut controller = match created {
        Ok(controller) => controller,
        Err(e) => {
            error!("Failed to create controller: {}", e);
            return;
        }
    };

    controller.start();
    join(run(&mut controller, &EVENTS), accessory_task(&EVENTS)).await;
}
