// simulation.rs
use crate::config::SimConfig;
use crate::control_system::traffic_light_controller::TrafficLightController;
use crate::dispatch::coordinator::{DispatchCoordinator, DispatchSettings};
use crate::error::{CommandError, ConfigError, DispatchError, RoadError, SimError};
use crate::monitoring::telemetry::{TelemetryEvent, TelemetrySender};
use crate::shared_data::PassengerRequest;
use crate::simulation_engine::cell::Cell;
use crate::simulation_engine::grid::{RoadNetwork, TopologyClass};
use crate::simulation_engine::map_loader::MapLayout;
use crate::simulation_engine::movement::{run_taxi, DriveContext, VehicleTimings};
use crate::simulation_engine::route_generation::Router;
use crate::simulation_engine::vehicles::{Fleet, VehicleId, VehicleSnapshot};

use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Duration};

// Seed offsets keep the random streams of the different actors apart.
const PLACEMENT_STREAM: u64 = 1;
const TAXI_STREAM: u64 = 1 << 20;
const DISPATCH_STREAM: u64 = 1 << 40;

/// Keeps flow sentinels in line with the road map.
pub async fn run_flow_refresh(network: Arc<RoadNetwork>, period: Duration) {
    loop {
        sleep(period).await;
        network.refresh_flows();
    }
}

/// A complete city: road network, traffic lights, fleet and dispatch.
///
/// Nothing moves until [`Simulation::start`] is called. Requests and road
/// changes may be submitted at any time afterwards.
pub struct Simulation {
    config: SimConfig,
    network: Arc<RoadNetwork>,
    router: Arc<Router>,
    lights: Arc<TrafficLightController>,
    fleet: Arc<Fleet>,
    coordinator: Arc<DispatchCoordinator>,
    telemetry: TelemetrySender,
    next_request: AtomicU64,
}

impl Simulation {
    /// Builds the city and places `config.taxi_count` taxis on random cells
    /// without a traffic light.
    pub fn new(
        config: SimConfig,
        layout: &MapLayout,
        telemetry: TelemetrySender,
    ) -> Result<Self, SimError> {
        let (network, lights) = Self::build_city(&config, layout)?;
        let free_cells: Vec<Cell> = (0..network.rows())
            .flat_map(|r| (0..network.cols()).map(move |c| Cell::new(r as i32, c as i32)))
            .filter(|&cell| !lights.has_signal(cell))
            .collect();
        if free_cells.is_empty() && config.taxi_count > 0 {
            return Err(ConfigError::NoStartingCell.into());
        }
        let mut rng = SmallRng::seed_from_u64(config.seed.wrapping_add(PLACEMENT_STREAM));
        let positions: Vec<Cell> = (0..config.taxi_count)
            .filter_map(|_| free_cells.choose(&mut rng).copied())
            .collect();
        Ok(Self::assemble(config, network, lights, &positions, telemetry))
    }

    /// Like [`Simulation::new`], with the taxis placed on the given cells.
    pub fn with_fleet(
        config: SimConfig,
        layout: &MapLayout,
        positions: &[Cell],
        telemetry: TelemetrySender,
    ) -> Result<Self, SimError> {
        let (network, lights) = Self::build_city(&config, layout)?;
        if let Some(&cell) = positions.iter().find(|&&cell| !network.contains(cell)) {
            return Err(ConfigError::OutOfBounds(cell).into());
        }
        Ok(Self::assemble(config, network, lights, positions, telemetry))
    }

    fn build_city(
        config: &SimConfig,
        layout: &MapLayout,
    ) -> Result<(RoadNetwork, TrafficLightController), SimError> {
        let network = RoadNetwork::from_layout(layout)?;
        let mut rng = SmallRng::seed_from_u64(config.seed);
        let lights = TrafficLightController::initialize(&network, config.light_period(), &mut rng);
        log::info!(
            "city ready: {}x{} cells, {} traffic lights",
            network.rows(),
            network.cols(),
            lights.signal_count()
        );
        Ok((network, lights))
    }

    fn assemble(
        config: SimConfig,
        network: RoadNetwork,
        lights: TrafficLightController,
        positions: &[Cell],
        telemetry: TelemetrySender,
    ) -> Self {
        let network = Arc::new(network);
        let router = Arc::new(Router::new(Arc::clone(&network)));
        let fleet = Arc::new(Fleet::new(positions));
        let settings = DispatchSettings {
            window: config.dispatch_window(),
            poll: config.dispatch_poll(),
            radius: config.dispatch_radius,
            award: config.dispatch_award,
        };
        let coordinator = Arc::new(DispatchCoordinator::new(
            Arc::clone(&fleet),
            Arc::clone(&router),
            settings,
            telemetry.clone(),
        ));
        Self {
            config,
            network,
            router,
            lights: Arc::new(lights),
            fleet,
            coordinator,
            telemetry,
            next_request: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn network(&self) -> &Arc<RoadNetwork> {
        &self.network
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn lights(&self) -> &Arc<TrafficLightController> {
        &self.lights
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    /// Spawns the light ticker, the flow refresh ticker and one driving task
    /// per taxi. A task in the returned set only finishes on a fatal error.
    pub fn start(&self) -> JoinSet<Result<(), SimError>> {
        let mut tasks = JoinSet::new();

        let lights = Arc::clone(&self.lights);
        tasks.spawn(async move {
            TrafficLightController::run_update_loop(lights).await;
            Ok(())
        });

        let network = Arc::clone(&self.network);
        let period = self.config.flow_refresh();
        tasks.spawn(async move {
            run_flow_refresh(network, period).await;
            Ok(())
        });

        let ctx = Arc::new(DriveContext {
            router: Arc::clone(&self.router),
            lights: Arc::clone(&self.lights),
            telemetry: self.telemetry.clone(),
            timings: VehicleTimings {
                drive_time: self.config.drive_time(),
                rest_time: self.config.rest_time(),
                signal_recheck: self.config.signal_recheck(),
                wander_steps: self.config.wander_steps(),
                service_bonus: self.config.service_bonus,
            },
        });
        for taxi in self.fleet.iter() {
            let seed = self
                .config
                .seed
                .wrapping_add(TAXI_STREAM)
                .wrapping_add(u64::from(taxi.id().0));
            tasks.spawn(run_taxi(
                Arc::clone(taxi),
                Arc::clone(&ctx),
                SmallRng::seed_from_u64(seed),
            ));
        }
        log::info!("simulation started with {} taxis", self.fleet.len());
        tasks
    }

    /// Validates a request against the map and dispatches it in its own task.
    pub fn submit_request(
        &self,
        origin: Cell,
        destination: Cell,
    ) -> Result<JoinHandle<Result<VehicleId, DispatchError>>, CommandError> {
        let id = self.next_request.fetch_add(1, Ordering::SeqCst);
        let request = PassengerRequest::new(
            id,
            origin,
            destination,
            self.network.rows(),
            self.network.cols(),
        )?;
        Ok(self.dispatch(request))
    }

    /// Dispatches an already validated request in its own task.
    pub fn dispatch(&self, request: PassengerRequest) -> JoinHandle<Result<VehicleId, DispatchError>> {
        log::info!("dispatching {request}");
        let coordinator = Arc::clone(&self.coordinator);
        let seed = self
            .config
            .seed
            .wrapping_add(DISPATCH_STREAM)
            .wrapping_add(request.id);
        tokio::spawn(async move {
            let mut rng = SmallRng::seed_from_u64(seed);
            coordinator.dispatch(request, &mut rng).await
        })
    }

    pub fn open_road(&self, a: Cell, b: Cell) -> Result<(), RoadError> {
        let result = self.network.open_road(a, b);
        self.report_road(a, b, &result, |a_class, b_class| {
            TelemetryEvent::RoadOpened {
                a,
                b,
                a_class,
                b_class,
            }
        });
        result
    }

    pub fn close_road(&self, a: Cell, b: Cell) -> Result<(), RoadError> {
        let result = self.network.close_road(a, b);
        self.report_road(a, b, &result, |a_class, b_class| {
            TelemetryEvent::RoadClosed {
                a,
                b,
                a_class,
                b_class,
            }
        });
        result
    }

    fn report_road<F>(&self, a: Cell, b: Cell, result: &Result<(), RoadError>, done: F)
    where
        F: FnOnce(TopologyClass, TopologyClass) -> TelemetryEvent,
    {
        let event = match result {
            Ok(()) => {
                // both ends of a changed road are on the map
                let (Some(a_class), Some(b_class)) =
                    (self.network.topology_class(a), self.network.topology_class(b))
                else {
                    return;
                };
                done(a_class, b_class)
            }
            Err(e) => TelemetryEvent::RoadRejected {
                a,
                b,
                reason: e.to_string(),
            },
        };
        self.telemetry.send(event);
    }

    /// Idle taxis with position and credit.
    pub fn idle_report(&self) -> Vec<VehicleSnapshot> {
        self.fleet.idle_report()
    }
}
