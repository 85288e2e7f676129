use crate::shared_data::{current_timestamp, PassengerRequest};
use crate::simulation_engine::cell::Cell;
use crate::simulation_engine::grid::TopologyClass;
use crate::simulation_engine::vehicles::{VehicleId, VehicleStatus};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

/// Something worth reporting outside the simulation core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TelemetryEvent {
    DispatchAssigned {
        request: PassengerRequest,
        vehicle: VehicleId,
    },
    DispatchFailed {
        request: PassengerRequest,
        reason: String,
    },
    RequestCompleted {
        request: PassengerRequest,
        vehicle: VehicleId,
        credit: u64,
    },
    /// Carries the shape of both ends after the change.
    RoadOpened {
        a: Cell,
        b: Cell,
        a_class: TopologyClass,
        b_class: TopologyClass,
    },
    RoadClosed {
        a: Cell,
        b: Cell,
        a_class: TopologyClass,
        b_class: TopologyClass,
    },
    RoadRejected {
        a: Cell,
        b: Cell,
        reason: String,
    },
    StatusChanged {
        vehicle: VehicleId,
        from: VehicleStatus,
        to: VehicleStatus,
    },
}

/// An event stamped with the simulated milliseconds since start.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub elapsed_ms: u64,
    pub event: TelemetryEvent,
}

/// Flat CSV row for one event.
#[derive(Debug, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: u64,
    pub elapsed_ms: u64,
    pub kind: String,
    pub vehicle: Option<u32>,
    pub detail: String,
}

impl TelemetryRecord {
    pub fn from_event(timed: &TimedEvent) -> Self {
        let (kind, vehicle, detail) = match &timed.event {
            TelemetryEvent::DispatchAssigned { request, vehicle } => {
                ("dispatch_assigned", Some(vehicle.0), request.to_string())
            }
            TelemetryEvent::DispatchFailed { request, reason } => {
                ("dispatch_failed", None, format!("{request}: {reason}"))
            }
            TelemetryEvent::RequestCompleted {
                request,
                vehicle,
                credit,
            } => (
                "request_completed",
                Some(vehicle.0),
                format!("{request}, credit {credit}"),
            ),
            TelemetryEvent::RoadOpened {
                a,
                b,
                a_class,
                b_class,
            } => (
                "road_opened",
                None,
                format!("{a}<->{b} {a_class:?}/{b_class:?}"),
            ),
            TelemetryEvent::RoadClosed {
                a,
                b,
                a_class,
                b_class,
            } => (
                "road_closed",
                None,
                format!("{a}<->{b} {a_class:?}/{b_class:?}"),
            ),
            TelemetryEvent::RoadRejected { a, b, reason } => {
                ("road_rejected", None, format!("{a}<->{b}: {reason}"))
            }
            TelemetryEvent::StatusChanged { vehicle, from, to } => (
                "status_changed",
                Some(vehicle.0),
                format!("{from:?}->{to:?}"),
            ),
        };
        Self {
            timestamp: current_timestamp(),
            elapsed_ms: timed.elapsed_ms,
            kind: kind.to_string(),
            vehicle,
            detail,
        }
    }
}

/// Sending half of the telemetry channel. Sending never blocks, and events
/// sent after the monitor has gone away are dropped.
#[derive(Debug, Clone)]
pub struct TelemetrySender {
    tx: Option<UnboundedSender<TimedEvent>>,
    started: Instant,
}

impl TelemetrySender {
    pub fn channel() -> (Self, UnboundedReceiver<TimedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                started: Instant::now(),
            },
            rx,
        )
    }

    /// A sender that discards everything.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            started: Instant::now(),
        }
    }

    pub fn send(&self, event: TelemetryEvent) {
        if let Some(tx) = &self.tx {
            let elapsed_ms = self.started.elapsed().as_millis() as u64;
            let _ = tx.send(TimedEvent { elapsed_ms, event });
        }
    }
}

/// Appends one record to a CSV file, writing the header when the file is new.
fn log_to_csv<T: Serialize>(path: &Path, record: &T) -> Result<(), Box<dyn Error>> {
    let file_exists = path.exists();
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    wtr.serialize(record)?;
    wtr.flush()?;
    Ok(())
}

fn log_event(timed: &TimedEvent) {
    match &timed.event {
        TelemetryEvent::DispatchAssigned { request, vehicle } => {
            log::info!("[{} ms] {vehicle} assigned to {request}", timed.elapsed_ms)
        }
        TelemetryEvent::DispatchFailed { request, reason } => {
            log::warn!("[{} ms] {request} failed: {reason}", timed.elapsed_ms)
        }
        TelemetryEvent::RequestCompleted {
            request,
            vehicle,
            credit,
        } => log::info!(
            "[{} ms] {vehicle} completed {request}, credit now {credit}",
            timed.elapsed_ms
        ),
        TelemetryEvent::RoadOpened {
            a,
            b,
            a_class,
            b_class,
        } => log::info!(
            "[{} ms] road {a}<->{b} opened, now {a_class:?} and {b_class:?}",
            timed.elapsed_ms
        ),
        TelemetryEvent::RoadClosed {
            a,
            b,
            a_class,
            b_class,
        } => log::info!(
            "[{} ms] road {a}<->{b} closed, now {a_class:?} and {b_class:?}",
            timed.elapsed_ms
        ),
        TelemetryEvent::RoadRejected { a, b, reason } => {
            log::warn!("[{} ms] road {a}<->{b} unchanged: {reason}", timed.elapsed_ms)
        }
        TelemetryEvent::StatusChanged { vehicle, from, to } => {
            log::debug!("[{} ms] {vehicle} {from:?} -> {to:?}", timed.elapsed_ms)
        }
    }
}

/// Drains the telemetry channel until every sender is gone, logging each event
/// and, with `csv_path` set, appending it to that file.
pub async fn run_monitor(mut rx: UnboundedReceiver<TimedEvent>, csv_path: Option<PathBuf>) {
    while let Some(timed) = rx.recv().await {
        log_event(&timed);
        if let Some(path) = &csv_path {
            if let Err(e) = log_to_csv(path, &TelemetryRecord::from_event(&timed)) {
                log::error!("failed to write telemetry to {}: {e}", path.display());
            }
        }
    }
}
