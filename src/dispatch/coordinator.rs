use crate::error::DispatchError;
use crate::monitoring::telemetry::{TelemetryEvent, TelemetrySender};
use crate::shared_data::PassengerRequest;
use crate::simulation_engine::route_generation::Router;
use crate::simulation_engine::vehicles::{Fleet, VehicleId};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub window: Duration,
    pub poll: Duration,
    /// Chebyshev distance from the pickup within which taxis may bid.
    pub radius: i32,
    /// Credit awarded once per window to every taxi that bids.
    pub award: u64,
}

/// A bidder as seen when the window closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub vehicle: VehicleId,
    pub credit: u64,
    /// Road distance to the pickup.
    pub distance: u32,
}

/// Bidding record of one request.
#[derive(Debug)]
pub struct DispatchWindow {
    pub request: PassengerRequest,
    pub closes_at: Instant,
    bidders: Vec<VehicleId>,
    credited: HashSet<VehicleId>,
}

impl DispatchWindow {
    pub fn open(request: PassengerRequest, duration: Duration) -> Self {
        Self {
            request,
            closes_at: Instant::now() + duration,
            bidders: Vec::new(),
            credited: HashSet::new(),
        }
    }

    /// Records a bid. Returns false if the taxi already bid in this window.
    pub fn register(&mut self, vehicle: VehicleId) -> bool {
        if !self.credited.insert(vehicle) {
            return false;
        }
        self.bidders.push(vehicle);
        true
    }

    pub fn bidders(&self) -> &[VehicleId] {
        &self.bidders
    }

    pub fn is_open(&self) -> bool {
        Instant::now() < self.closes_at
    }
}

/// Highest credit wins; ties go to the taxi closest to the pickup; remaining
/// ties are settled at random.
pub fn choose_winner<R: Rng + ?Sized>(candidates: &[Candidate], rng: &mut R) -> Option<VehicleId> {
    let best_credit = candidates.iter().map(|c| c.credit).max()?;
    let shortest = candidates
        .iter()
        .filter(|c| c.credit == best_credit)
        .map(|c| c.distance)
        .min()?;
    let finalists: Vec<VehicleId> = candidates
        .iter()
        .filter(|c| c.credit == best_credit && c.distance == shortest)
        .map(|c| c.vehicle)
        .collect();
    finalists.choose(rng).copied()
}

/// Matches passenger requests to taxis. Any number of dispatches may run at
/// once over the same fleet.
pub struct DispatchCoordinator {
    fleet: Arc<Fleet>,
    router: Arc<Router>,
    settings: DispatchSettings,
    telemetry: TelemetrySender,
}

impl DispatchCoordinator {
    pub fn new(
        fleet: Arc<Fleet>,
        router: Arc<Router>,
        settings: DispatchSettings,
        telemetry: TelemetrySender,
    ) -> Self {
        Self {
            fleet,
            router,
            settings,
            telemetry,
        }
    }

    /// Runs the bidding window for `request` and assigns it to one taxi.
    pub async fn dispatch<R: Rng + ?Sized>(
        &self,
        request: PassengerRequest,
        rng: &mut R,
    ) -> Result<VehicleId, DispatchError> {
        let mut window = DispatchWindow::open(request, self.settings.window);
        let mut ticker = interval(self.settings.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while window.is_open() {
            ticker.tick().await;
            // the tick due at the closing instant is not a poll
            if !window.is_open() {
                break;
            }
            self.collect_bids(&mut window);
        }

        let outcome = self.commit(&window, rng);
        match &outcome {
            Ok(vehicle) => self.telemetry.send(TelemetryEvent::DispatchAssigned {
                request,
                vehicle: *vehicle,
            }),
            Err(e) => self.telemetry.send(TelemetryEvent::DispatchFailed {
                request,
                reason: e.to_string(),
            }),
        }
        outcome
    }

    /// One poll: every idle taxi near the pickup bids and earns the award,
    /// once per window.
    fn collect_bids(&self, window: &mut DispatchWindow) {
        let origin = window.request.origin;
        for taxi in self.fleet.iter() {
            if taxi.position().chebyshev_distance(origin) > self.settings.radius
                || !taxi.is_available()
            {
                continue;
            }
            if window.register(taxi.id()) {
                taxi.add_credit(self.settings.award);
            }
        }
    }

    fn candidates(&self, window: &DispatchWindow) -> Vec<Candidate> {
        let origin = window.request.origin;
        window
            .bidders()
            .iter()
            .filter_map(|&id| self.fleet.get(id))
            .filter(|taxi| taxi.is_available())
            .filter_map(|taxi| {
                let distance = self.router.shortest_path_length(taxi.position(), origin)?;
                Some(Candidate {
                    vehicle: taxi.id(),
                    credit: taxi.credit(),
                    distance,
                })
            })
            .collect()
    }

    /// Picks a winner and calls it. A winner taken by another dispatch in the
    /// meantime is dropped and the choice repeated among the rest.
    fn commit<R: Rng + ?Sized>(
        &self,
        window: &DispatchWindow,
        rng: &mut R,
    ) -> Result<VehicleId, DispatchError> {
        let mut candidates = self.candidates(window);
        if candidates.is_empty() {
            return Err(DispatchError::NoCandidates);
        }
        while let Some(winner) = choose_winner(&candidates, rng) {
            let called = self
                .fleet
                .get(winner)
                .map(|taxi| taxi.call(window.request))
                .unwrap_or(false);
            if called {
                return Ok(winner);
            }
            candidates.retain(|c| c.vehicle != winner);
        }
        Err(DispatchError::CandidatesLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_engine::cell::Cell;
    use crate::simulation_engine::grid::RoadNetwork;
    use crate::simulation_engine::map_loader::MapLayout;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn candidate(id: u32, credit: u64, distance: u32) -> Candidate {
        Candidate {
            vehicle: VehicleId(id),
            credit,
            distance,
        }
    }

    fn coordinator(positions: &[Cell]) -> (DispatchCoordinator, Arc<Fleet>) {
        let network = RoadNetwork::from_layout(&MapLayout::fully_connected(5, 5)).unwrap();
        let fleet = Arc::new(Fleet::new(positions));
        let settings = DispatchSettings {
            window: Duration::from_millis(3000),
            poll: Duration::from_millis(100),
            radius: 2,
            award: 1,
        };
        let coordinator = DispatchCoordinator::new(
            Arc::clone(&fleet),
            Arc::new(Router::new(Arc::new(network))),
            settings,
            TelemetrySender::disabled(),
        );
        (coordinator, fleet)
    }

    fn request(origin: Cell) -> PassengerRequest {
        PassengerRequest {
            id: 1,
            origin,
            destination: Cell::new(4, 4),
        }
    }

    #[test]
    fn credit_beats_distance() {
        let mut rng = SmallRng::seed_from_u64(0);
        let pool = [candidate(0, 2, 4), candidate(1, 5, 9), candidate(2, 5, 3)];
        assert_eq!(choose_winner(&pool, &mut rng), Some(VehicleId(2)));
        assert_eq!(choose_winner(&[], &mut rng), None);
    }

    #[test]
    fn equal_candidates_win_evenly() {
        let mut rng = SmallRng::seed_from_u64(42);
        let pool = [candidate(0, 3, 2), candidate(1, 3, 2)];
        let trials = 4000;
        let first = (0..trials)
            .filter(|_| choose_winner(&pool, &mut rng) == Some(VehicleId(0)))
            .count();
        assert!((1800..=2200).contains(&first), "taxi 0 won {first} of {trials}");
    }

    #[test]
    fn window_credits_each_taxi_once() {
        let mut window = DispatchWindow::open(request(Cell::new(0, 0)), Duration::from_millis(10));
        assert!(window.register(VehicleId(3)));
        assert!(!window.register(VehicleId(3)));
        assert_eq!(window.bidders(), &[VehicleId(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn lone_idle_taxi_in_range_wins() {
        let (coordinator, fleet) =
            coordinator(&[Cell::new(1, 1), Cell::new(2, 2), Cell::new(0, 2)]);
        let busy = request(Cell::new(4, 0));
        fleet.get(VehicleId(0)).unwrap().call(busy);
        fleet.get(VehicleId(2)).unwrap().call(busy);

        let mut rng = SmallRng::seed_from_u64(1);
        let won = coordinator.dispatch(request(Cell::new(1, 2)), &mut rng).await;
        assert_eq!(won, Ok(VehicleId(1)));
        let winner = fleet.get(VehicleId(1)).unwrap();
        assert_eq!(winner.credit(), 1);
        assert_eq!(winner.request().map(|r| r.origin), Some(Cell::new(1, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn taxis_out_of_range_do_not_bid() {
        let (coordinator, fleet) = coordinator(&[Cell::new(4, 4)]);
        let mut rng = SmallRng::seed_from_u64(1);
        let result = coordinator.dispatch(request(Cell::new(0, 0)), &mut rng).await;
        assert_eq!(result, Err(DispatchError::NoCandidates));
        assert_eq!(fleet.get(VehicleId(0)).unwrap().credit(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn taxi_taken_during_the_window_is_skipped() {
        let (coordinator, fleet) = coordinator(&[Cell::new(0, 0)]);
        let coordinator = Arc::new(coordinator);
        let pending = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let mut rng = SmallRng::seed_from_u64(1);
                coordinator.dispatch(request(Cell::new(0, 1)), &mut rng).await
            })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fleet.get(VehicleId(0)).unwrap().call(request(Cell::new(3, 3))));
        assert_eq!(pending.await.unwrap(), Err(DispatchError::NoCandidates));
    }

    #[tokio::test(start_paused = true)]
    async fn taxi_arriving_after_the_last_poll_does_not_bid() {
        let (coordinator, fleet) = coordinator(&[Cell::new(4, 4)]);
        let coordinator = Arc::new(coordinator);
        let pending = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let mut rng = SmallRng::seed_from_u64(1);
                coordinator.dispatch(request(Cell::new(0, 0)), &mut rng).await
            })
        };
        // last poll inside the window runs at 2900 ms
        tokio::time::sleep(Duration::from_millis(2950)).await;
        let taxi = fleet.get(VehicleId(0)).unwrap();
        taxi.advance(Cell::new(1, 1));
        assert_eq!(pending.await.unwrap(), Err(DispatchError::NoCandidates));
        assert_eq!(taxi.credit(), 0);
        assert!(!taxi.is_called());
    }

    #[tokio::test(start_paused = true)]
    async fn symmetric_taxis_share_dispatches_evenly() {
        let trials = 200;
        let mut first = 0;
        for seed in 0..trials {
            let (coordinator, _fleet) = coordinator(&[Cell::new(0, 1), Cell::new(1, 0)]);
            let mut rng = SmallRng::seed_from_u64(seed);
            match coordinator.dispatch(request(Cell::new(0, 0)), &mut rng).await {
                Ok(VehicleId(0)) => first += 1,
                Ok(VehicleId(1)) => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert!((70..=130).contains(&first), "taxi 0 won {first} of {trials}");
    }
}
