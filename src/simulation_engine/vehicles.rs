use crate::shared_data::PassengerRequest;
use crate::simulation_engine::cell::Cell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub u32);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Taxi-{:02}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatus {
    /// Wandering without a passenger, open for dispatch.
    Idle,
    /// Driving to a pickup.
    Assigned,
    /// Driving a passenger to the destination.
    Serving,
    /// Stopped after a pickup or a drop-off.
    Resting,
}

#[derive(Debug, Clone)]
struct VehicleState {
    previous: Cell,
    position: Cell,
    status: VehicleStatus,
    request: Option<PassengerRequest>,
}

/// Point-in-time copy of a vehicle, used for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleSnapshot {
    pub id: VehicleId,
    pub position: Cell,
    pub status: VehicleStatus,
    pub request: Option<PassengerRequest>,
    pub credit: u64,
}

/// Shared state of one taxi.
///
/// The driving task owns the state machine; dispatchers only read position and
/// status and hand over requests through [`VehicleAgent::call`]. Status and
/// request always change together under the same lock, so a taxi is never
/// seen `Idle` or `Resting` with a request attached.
pub struct VehicleAgent {
    id: VehicleId,
    state: Mutex<VehicleState>,
    credit: AtomicU64,
}

impl VehicleAgent {
    pub fn new(id: VehicleId, position: Cell) -> Self {
        Self {
            id,
            state: Mutex::new(VehicleState {
                previous: position,
                position,
                status: VehicleStatus::Idle,
                request: None,
            }),
            credit: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn position(&self) -> Cell {
        self.state.lock().position
    }

    pub fn previous_position(&self) -> Cell {
        self.state.lock().previous
    }

    pub fn status(&self) -> VehicleStatus {
        self.state.lock().status
    }

    pub fn request(&self) -> Option<PassengerRequest> {
        self.state.lock().request
    }

    /// True while a request is attached, i.e. the taxi is `Assigned` or `Serving`.
    pub fn is_called(&self) -> bool {
        self.state.lock().request.is_some()
    }

    /// Idle and not yet claimed by any dispatcher.
    pub fn is_available(&self) -> bool {
        let state = self.state.lock();
        state.status == VehicleStatus::Idle && state.request.is_none()
    }

    pub fn credit(&self) -> u64 {
        self.credit.load(Ordering::SeqCst)
    }

    pub fn add_credit(&self, amount: u64) -> u64 {
        self.credit.fetch_add(amount, Ordering::SeqCst) + amount
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        let state = self.state.lock();
        VehicleSnapshot {
            id: self.id,
            position: state.position,
            status: state.status,
            request: state.request,
            credit: self.credit(),
        }
    }

    /// Hands `request` to this taxi. Succeeds only for an idle, unclaimed taxi;
    /// the check and the assignment happen under one lock, so two dispatchers
    /// racing for the same taxi cannot both win.
    pub fn call(&self, request: PassengerRequest) -> bool {
        let mut state = self.state.lock();
        if state.status != VehicleStatus::Idle || state.request.is_some() {
            return false;
        }
        state.request = Some(request);
        state.status = VehicleStatus::Assigned;
        true
    }

    pub(crate) fn advance(&self, next: Cell) {
        let mut state = self.state.lock();
        state.previous = state.position;
        state.position = next;
    }

    /// End of an idle wander: rest unless a dispatcher got here first.
    pub(crate) fn rest_unless_called(&self) -> bool {
        let mut state = self.state.lock();
        if state.request.is_some() {
            return false;
        }
        state.status = VehicleStatus::Resting;
        true
    }

    /// Passenger picked up. The request is handed back to the driving task
    /// for the rest stop and re-attached by [`VehicleAgent::begin_service`].
    pub(crate) fn rest_after_pickup(&self) -> Option<PassengerRequest> {
        let mut state = self.state.lock();
        state.status = VehicleStatus::Resting;
        state.request.take()
    }

    pub(crate) fn begin_service(&self, request: PassengerRequest) {
        let mut state = self.state.lock();
        state.request = Some(request);
        state.status = VehicleStatus::Serving;
    }

    pub(crate) fn rest_after_dropoff(&self) {
        let mut state = self.state.lock();
        state.request = None;
        state.status = VehicleStatus::Resting;
    }

    pub(crate) fn become_idle(&self) {
        let mut state = self.state.lock();
        state.request = None;
        state.status = VehicleStatus::Idle;
    }
}

/// All taxis of the simulation, indexed by id.
pub struct Fleet {
    vehicles: Vec<Arc<VehicleAgent>>,
}

impl Fleet {
    /// One taxi per starting cell; ids follow the order of `positions`.
    pub fn new(positions: &[Cell]) -> Self {
        let vehicles = positions
            .iter()
            .enumerate()
            .map(|(i, &cell)| Arc::new(VehicleAgent::new(VehicleId(i as u32), cell)))
            .collect();
        Self { vehicles }
    }

    pub fn get(&self, id: VehicleId) -> Option<&Arc<VehicleAgent>> {
        self.vehicles.get(id.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<VehicleAgent>> {
        self.vehicles.iter()
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    /// Idle taxis with their position and credit, ordered by id.
    pub fn idle_report(&self) -> Vec<VehicleSnapshot> {
        self.vehicles
            .iter()
            .map(|v| v.snapshot())
            .filter(|s| s.status == VehicleStatus::Idle && s.request.is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PassengerRequest {
        PassengerRequest {
            id: 1,
            origin: Cell::new(1, 1),
            destination: Cell::new(2, 2),
        }
    }

    #[test]
    fn call_claims_an_idle_taxi_once() {
        let taxi = VehicleAgent::new(VehicleId(0), Cell::new(0, 0));
        assert!(taxi.call(request()));
        assert_eq!(taxi.status(), VehicleStatus::Assigned);
        assert!(taxi.is_called());
        assert!(!taxi.call(request()));
    }

    #[test]
    fn resting_taxis_cannot_be_called() {
        let taxi = VehicleAgent::new(VehicleId(0), Cell::new(0, 0));
        assert!(taxi.rest_unless_called());
        assert!(!taxi.is_available());
        assert!(!taxi.call(request()));
    }

    #[test]
    fn wander_does_not_rest_a_called_taxi() {
        let taxi = VehicleAgent::new(VehicleId(0), Cell::new(0, 0));
        taxi.call(request());
        assert!(!taxi.rest_unless_called());
        assert_eq!(taxi.status(), VehicleStatus::Assigned);
    }

    #[test]
    fn rest_states_never_hold_a_request() {
        let taxi = VehicleAgent::new(VehicleId(0), Cell::new(0, 0));
        taxi.call(request());
        let held = taxi.rest_after_pickup();
        assert_eq!(held, Some(request()));
        assert_eq!(taxi.status(), VehicleStatus::Resting);
        assert!(!taxi.is_called());

        taxi.begin_service(request());
        assert_eq!(taxi.snapshot().request, Some(request()));
        taxi.rest_after_dropoff();
        assert!(!taxi.is_called());
        taxi.become_idle();
        assert!(taxi.is_available());
    }

    #[test]
    fn advance_keeps_the_previous_cell() {
        let taxi = VehicleAgent::new(VehicleId(0), Cell::new(0, 0));
        taxi.advance(Cell::new(0, 1));
        assert_eq!(taxi.previous_position(), Cell::new(0, 0));
        assert_eq!(taxi.position(), Cell::new(0, 1));
    }

    #[test]
    fn idle_report_lists_only_idle_taxis() {
        let fleet = Fleet::new(&[Cell::new(0, 0), Cell::new(1, 1), Cell::new(2, 2)]);
        fleet.get(VehicleId(1)).unwrap().call(request());
        let ids: Vec<_> = fleet.idle_report().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![VehicleId(0), VehicleId(2)]);
    }
}
