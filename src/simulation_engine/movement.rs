use crate::control_system::traffic_light_controller::TrafficLightController;
use crate::error::SimError;
use crate::monitoring::telemetry::{TelemetryEvent, TelemetrySender};
use crate::shared_data::PassengerRequest;
use crate::simulation_engine::cell::Cell;
use crate::simulation_engine::route_generation::Router;
use crate::simulation_engine::vehicles::{VehicleAgent, VehicleStatus};
use rand::Rng;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

/// Timings that drive a taxi's state machine.
#[derive(Debug, Clone, Copy)]
pub struct VehicleTimings {
    pub drive_time: Duration,
    pub rest_time: Duration,
    pub signal_recheck: Duration,
    pub wander_steps: u64,
    pub service_bonus: u64,
}

/// Everything a driving task needs besides its own taxi.
pub struct DriveContext {
    pub router: Arc<Router>,
    pub lights: Arc<TrafficLightController>,
    pub telemetry: TelemetrySender,
    pub timings: VehicleTimings,
}

impl DriveContext {
    fn report_status(&self, agent: &VehicleAgent, from: VehicleStatus, to: VehicleStatus) {
        log::debug!("{} {:?} -> {:?} at {}", agent.id(), from, to, agent.position());
        self.telemetry.send(TelemetryEvent::StatusChanged {
            vehicle: agent.id(),
            from,
            to,
        });
    }
}

/// Moves `agent` one cell to `next`, a neighbour of its position.
///
/// Waits at a red light first. The road counter is raised for the duration of
/// the drive and lowered on arrival.
pub async fn drive_step(agent: &VehicleAgent, ctx: &DriveContext, next: Cell) {
    let cur = agent.position();
    let prev = agent.previous_position();

    if ctx.lights.has_signal(cur) {
        let mut flips = ctx.lights.subscribe();
        while ctx.lights.must_wait(prev, cur, next) {
            // woken by the next flip, re-checked at least every recheck period
            if let Ok(Err(_)) = timeout(ctx.timings.signal_recheck, flips.changed()).await {
                sleep(ctx.timings.signal_recheck).await;
            }
        }
    }

    let flows = ctx.router.network().flows();
    flows.add_flow(cur, next);
    sleep(ctx.timings.drive_time).await;
    agent.advance(next);
    flows.sub_flow(cur, next);
}

/// Drives `agent` along shortest, least-loaded roads until it reaches `dest`.
pub async fn drive_to<R: Rng>(
    agent: &VehicleAgent,
    ctx: &DriveContext,
    dest: Cell,
    rng: &mut R,
) -> Result<(), SimError> {
    loop {
        let cur = agent.position();
        if cur == dest {
            return Ok(());
        }
        let next = ctx.router.next_step(cur, dest, rng)?;
        drive_step(agent, ctx, next).await;
    }
}

/// Wanders at random until called or until the wander budget is used up.
async fn wander<R: Rng>(agent: &VehicleAgent, ctx: &DriveContext, rng: &mut R) -> Result<(), SimError> {
    for _ in 0..ctx.timings.wander_steps {
        let next = ctx.router.random_neighbor(agent.position(), rng)?;
        drive_step(agent, ctx, next).await;
        if agent.is_called() {
            break;
        }
    }
    Ok(())
}

/// Runs one taxi's state machine forever. Only returns on a fatal routing
/// error, which means the road map no longer makes sense.
///
/// Idle wander, then rest or (if called) drive to the pickup; rest at the
/// pickup; drive to the destination and collect the service bonus; rest; idle
/// again.
pub async fn run_taxi<R: Rng + Send>(
    agent: Arc<VehicleAgent>,
    ctx: Arc<DriveContext>,
    mut rng: R,
) -> Result<(), SimError> {
    // request carried through the rest stop between pickup and service
    let mut picked_up: Option<PassengerRequest> = None;

    loop {
        match agent.status() {
            VehicleStatus::Idle => {
                wander(&agent, &ctx, &mut rng).await?;
                if agent.rest_unless_called() {
                    ctx.report_status(&agent, VehicleStatus::Idle, VehicleStatus::Resting);
                } else {
                    ctx.report_status(&agent, VehicleStatus::Idle, VehicleStatus::Assigned);
                }
            }
            VehicleStatus::Assigned => {
                let Some(request) = agent.request() else {
                    agent.become_idle();
                    continue;
                };
                drive_to(&agent, &ctx, request.origin, &mut rng).await?;
                picked_up = agent.rest_after_pickup();
                ctx.report_status(&agent, VehicleStatus::Assigned, VehicleStatus::Resting);
            }
            VehicleStatus::Serving => {
                let Some(request) = agent.request() else {
                    agent.become_idle();
                    continue;
                };
                drive_to(&agent, &ctx, request.destination, &mut rng).await?;
                let credit = agent.add_credit(ctx.timings.service_bonus);
                agent.rest_after_dropoff();
                ctx.telemetry.send(TelemetryEvent::RequestCompleted {
                    request,
                    vehicle: agent.id(),
                    credit,
                });
                ctx.report_status(&agent, VehicleStatus::Serving, VehicleStatus::Resting);
            }
            VehicleStatus::Resting => {
                sleep(ctx.timings.rest_time).await;
                match picked_up.take() {
                    Some(request) => {
                        agent.begin_service(request);
                        ctx.report_status(&agent, VehicleStatus::Resting, VehicleStatus::Serving);
                    }
                    None => {
                        agent.become_idle();
                        ctx.report_status(&agent, VehicleStatus::Resting, VehicleStatus::Idle);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_system::traffic_light_controller::LightPhase;
    use crate::simulation_engine::grid::RoadNetwork;
    use crate::simulation_engine::map_loader::MapLayout;
    use crate::simulation_engine::vehicles::VehicleId;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use tokio::time::Instant;

    fn context(layout: MapLayout) -> DriveContext {
        let network = Arc::new(RoadNetwork::from_layout(&layout).unwrap());
        let mut rng = SmallRng::seed_from_u64(1);
        let lights = TrafficLightController::initialize(&network, Duration::from_millis(300), &mut rng);
        DriveContext {
            router: Arc::new(Router::new(network)),
            lights: Arc::new(lights),
            telemetry: TelemetrySender::disabled(),
            timings: VehicleTimings {
                drive_time: Duration::from_millis(100),
                rest_time: Duration::from_millis(1000),
                signal_recheck: Duration::from_millis(100),
                wander_steps: 5,
                service_bonus: 3,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn step_holds_the_road_counter_while_driving() {
        let ctx = context(MapLayout::fully_connected(2, 2).without_signals());
        let taxi = Arc::new(VehicleAgent::new(VehicleId(0), Cell::new(0, 0)));
        let ctx = Arc::new(ctx);
        let (a, b) = (Cell::new(0, 0), Cell::new(0, 1));

        let task = {
            let (taxi, ctx) = (Arc::clone(&taxi), Arc::clone(&ctx));
            tokio::spawn(async move { drive_step(&taxi, &ctx, b).await })
        };
        sleep(Duration::from_millis(50)).await;
        assert_eq!(ctx.router.network().flows().get_flow(a, b), Some(1));
        task.await.unwrap();
        assert_eq!(ctx.router.network().flows().get_flow(a, b), Some(0));
        assert_eq!(taxi.position(), b);
        assert_eq!(taxi.previous_position(), a);
    }

    #[tokio::test(start_paused = true)]
    async fn red_light_holds_the_taxi_until_the_flip() {
        let mut ctx = context(MapLayout::fully_connected(3, 3));
        let mut lights = TrafficLightController::initialize(
            ctx.router.network(),
            Duration::from_millis(300),
            &mut SmallRng::seed_from_u64(2),
        );
        let centre = Cell::new(1, 1);
        lights.set_signal(centre, Some(LightPhase::VerticalPriority));
        ctx.lights = Arc::new(lights);
        let ctx = Arc::new(ctx);

        // arrive at the centre from the left, then try to continue right
        let taxi = Arc::new(VehicleAgent::new(VehicleId(0), Cell::new(1, 0)));
        taxi.advance(centre);

        let flipper = {
            let lights = Arc::clone(&ctx.lights);
            tokio::spawn(async move {
                sleep(Duration::from_millis(450)).await;
                lights.flip();
            })
        };
        let started = Instant::now();
        drive_step(&taxi, &ctx, Cell::new(1, 2)).await;
        flipper.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(550));
        assert_eq!(taxi.position(), Cell::new(1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn drive_to_reaches_the_destination() {
        let ctx = context(MapLayout::fully_connected(4, 4).without_signals());
        let taxi = VehicleAgent::new(VehicleId(0), Cell::new(0, 0));
        let mut rng = SmallRng::seed_from_u64(4);
        let started = Instant::now();
        drive_to(&taxi, &ctx, Cell::new(3, 2), &mut rng).await.unwrap();
        assert_eq!(taxi.position(), Cell::new(3, 2));
        // five cells, 100 ms each
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_millis(600));
        assert_eq!(ctx.router.network().flows().total_flow(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn uncalled_taxi_rests_after_wandering() {
        let ctx = context(MapLayout::fully_connected(3, 3).without_signals());
        let ctx = Arc::new(ctx);
        let taxi = Arc::new(VehicleAgent::new(VehicleId(0), Cell::new(0, 0)));
        let task = tokio::spawn(run_taxi(
            Arc::clone(&taxi),
            Arc::clone(&ctx),
            SmallRng::seed_from_u64(6),
        ));
        // five steps of wander, then the rest stop
        sleep(Duration::from_millis(550)).await;
        assert_eq!(taxi.status(), VehicleStatus::Resting);
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(taxi.status(), VehicleStatus::Idle);
        task.abort();
    }
}
