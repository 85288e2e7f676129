use crate::simulation_engine::cell::{Cell, Direction};
use crate::simulation_engine::grid::RoadNetwork;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

/// Which axis currently has the green light at a signaled crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightPhase {
    VerticalPriority,
    HorizontalPriority,
}

impl LightPhase {
    pub fn flipped(self) -> Self {
        match self {
            LightPhase::VerticalPriority => LightPhase::HorizontalPriority,
            LightPhase::HorizontalPriority => LightPhase::VerticalPriority,
        }
    }
}

/// Traffic lights of the whole map.
///
/// Every light is stored as its starting phase; the current phase is that
/// value inverted once per global flip. The flip parity sits in a single
/// watch channel, so a flip changes all lights at once and waiting taxis can
/// be woken by it.
pub struct TrafficLightController {
    rows: usize,
    cols: usize,
    initial: Vec<Option<LightPhase>>,
    parity: watch::Sender<bool>,
    period: Duration,
}

impl TrafficLightController {
    /// Installs a light with a random phase on every planar crossing that has
    /// three or four roads. All other cells get no light.
    pub fn initialize<R: Rng + ?Sized>(
        network: &RoadNetwork,
        period: Duration,
        rng: &mut R,
    ) -> Self {
        let (rows, cols) = (network.rows(), network.cols());
        let mut initial = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                let cell = Cell::new(row as i32, col as i32);
                let eligible = network.is_planar(cell) && network.degree(cell) >= 3;
                initial.push(eligible.then(|| {
                    if rng.random_bool(0.5) {
                        LightPhase::VerticalPriority
                    } else {
                        LightPhase::HorizontalPriority
                    }
                }));
            }
        }
        let (parity, _) = watch::channel(false);
        Self {
            rows,
            cols,
            initial,
            parity,
            period,
        }
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        let in_bounds = cell.row >= 0
            && cell.col >= 0
            && (cell.row as usize) < self.rows
            && (cell.col as usize) < self.cols;
        in_bounds.then(|| cell.row as usize * self.cols + cell.col as usize)
    }

    /// Places a light showing `phase` right now at `cell`, or removes it.
    #[cfg(test)]
    pub(crate) fn set_signal(&mut self, cell: Cell, phase: Option<LightPhase>) {
        let flipped = *self.parity.borrow();
        if let Some(i) = self.index(cell) {
            self.initial[i] = phase.map(|p| if flipped { p.flipped() } else { p });
        }
    }

    /// Current phase of the light at `cell`, `None` if the cell has no light.
    pub fn phase(&self, cell: Cell) -> Option<LightPhase> {
        let initial = self.initial[self.index(cell)?]?;
        Some(if *self.parity.borrow() {
            initial.flipped()
        } else {
            initial
        })
    }

    pub fn has_signal(&self, cell: Cell) -> bool {
        self.index(cell)
            .map(|i| self.initial[i].is_some())
            .unwrap_or(false)
    }

    pub fn signal_count(&self) -> usize {
        self.initial.iter().filter(|p| p.is_some()).count()
    }

    /// Inverts every light on the map in one step.
    pub fn flip(&self) {
        self.parity.send_modify(|p| *p = !*p);
    }

    /// Receiver that is notified after every flip.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.parity.subscribe()
    }

    /// Whether a taxi that came from `prev`, sits at `cur` and wants to move
    /// to `next` has to wait for the light.
    ///
    /// Straight moves and U-turns wait while the other axis has priority.
    /// Left turns from the vertical axis wait while vertical traffic has
    /// priority, left turns from the horizontal axis while horizontal traffic
    /// has priority. Right turns never wait.
    pub fn must_wait(&self, prev: Cell, cur: Cell, next: Cell) -> bool {
        let vertical_green = match self.phase(cur) {
            Some(phase) => phase == LightPhase::VerticalPriority,
            None => return false,
        };

        if prev.row == cur.row && cur.row == next.row {
            return vertical_green;
        }
        if prev.col == cur.col && cur.col == next.col {
            return !vertical_green;
        }

        let from = |dir: Direction| prev == cur.step(dir);
        let to = |dir: Direction| next == cur.step(dir);

        if (to(Direction::Left) && from(Direction::Down))
            || (to(Direction::Right) && from(Direction::Up))
        {
            return vertical_green;
        }
        if (to(Direction::Down) && from(Direction::Right))
            || (to(Direction::Up) && from(Direction::Left))
        {
            return !vertical_green;
        }
        false
    }

    /// Flips all lights once per period, forever. Spawn it as its own task.
    pub async fn run_update_loop(controller: Arc<Self>) {
        loop {
            sleep(controller.period).await;
            controller.flip();
            log::debug!("traffic lights flipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_engine::map_loader::MapLayout;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn controller(layout: MapLayout) -> TrafficLightController {
        let network = RoadNetwork::from_layout(&layout).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        TrafficLightController::initialize(&network, Duration::from_millis(300), &mut rng)
    }

    fn centre_with(phase: LightPhase) -> (TrafficLightController, Cell) {
        let mut lights = controller(MapLayout::fully_connected(3, 3));
        let centre = Cell::new(1, 1);
        lights.set_signal(centre, Some(phase));
        (lights, centre)
    }

    #[test]
    fn only_planar_junctions_with_three_or_more_roads_get_lights() {
        let mut layout = MapLayout::fully_connected(3, 3);
        layout.set_planar(Cell::new(0, 1), false);
        let lights = controller(layout);
        assert!(lights.has_signal(Cell::new(1, 1)));
        assert!(lights.has_signal(Cell::new(1, 0)));
        assert!(!lights.has_signal(Cell::new(0, 1)));
        assert!(!lights.has_signal(Cell::new(0, 0)));
        assert_eq!(lights.signal_count(), 4);
    }

    #[test]
    fn double_flip_is_identity() {
        let lights = controller(MapLayout::fully_connected(4, 4));
        let cells: Vec<Cell> = (0..4)
            .flat_map(|r| (0..4).map(move |c| Cell::new(r, c)))
            .collect();
        let before: Vec<_> = cells.iter().map(|&c| lights.phase(c)).collect();
        lights.flip();
        let once: Vec<_> = cells.iter().map(|&c| lights.phase(c)).collect();
        lights.flip();
        let twice: Vec<_> = cells.iter().map(|&c| lights.phase(c)).collect();
        assert_eq!(before, twice);
        for (b, o) in before.iter().zip(&once) {
            assert_eq!(b.map(LightPhase::flipped), *o);
        }
    }

    #[test]
    fn right_turns_never_wait() {
        let c = Cell::new(1, 1);
        // (came from, going to) for each right turn
        let right_turns = [
            (Direction::Down, Direction::Right),
            (Direction::Up, Direction::Left),
            (Direction::Right, Direction::Up),
            (Direction::Left, Direction::Down),
        ];
        for phase in [LightPhase::VerticalPriority, LightPhase::HorizontalPriority] {
            let (lights, _) = centre_with(phase);
            for (from, to) in right_turns {
                assert!(!lights.must_wait(c.step(from), c, c.step(to)));
            }
        }
    }

    #[test]
    fn straight_moves_follow_their_axis() {
        let (lights, c) = centre_with(LightPhase::VerticalPriority);
        let (up, down, left, right) = (
            c.step(Direction::Up),
            c.step(Direction::Down),
            c.step(Direction::Left),
            c.step(Direction::Right),
        );
        assert!(!lights.must_wait(up, c, down));
        assert!(!lights.must_wait(down, c, down));
        assert!(lights.must_wait(left, c, right));
        assert!(lights.must_wait(right, c, right));

        lights.flip();
        assert!(lights.must_wait(up, c, down));
        assert!(!lights.must_wait(left, c, right));
    }

    #[test]
    fn left_turns_follow_the_observed_rule() {
        let (lights, c) = centre_with(LightPhase::VerticalPriority);
        let step = |d| c.step(d);
        // arriving vertically, turning left
        assert!(lights.must_wait(step(Direction::Down), c, step(Direction::Left)));
        assert!(lights.must_wait(step(Direction::Up), c, step(Direction::Right)));
        // arriving horizontally, turning left
        assert!(!lights.must_wait(step(Direction::Right), c, step(Direction::Down)));
        assert!(!lights.must_wait(step(Direction::Left), c, step(Direction::Up)));

        lights.flip();
        assert!(!lights.must_wait(step(Direction::Down), c, step(Direction::Left)));
        assert!(lights.must_wait(step(Direction::Right), c, step(Direction::Down)));
    }

    #[test]
    fn cells_without_lights_never_wait() {
        let lights = controller(MapLayout::fully_connected(3, 3).without_signals());
        let c = Cell::new(1, 1);
        assert!(!lights.must_wait(Cell::new(1, 0), c, Cell::new(1, 2)));
        assert!(!lights.must_wait(Cell::new(0, 1), c, Cell::new(2, 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn update_loop_flips_on_its_period() {
        let (lights, c) = centre_with(LightPhase::VerticalPriority);
        let lights = Arc::new(lights);
        let mut rx = lights.subscribe();
        let ticker = tokio::spawn(TrafficLightController::run_update_loop(Arc::clone(&lights)));
        rx.changed().await.unwrap();
        assert_eq!(lights.phase(c), Some(LightPhase::HorizontalPriority));
        ticker.abort();
    }

    #[test]
    fn light_placed_after_a_flip_shows_the_given_phase() {
        let mut lights = controller(MapLayout::fully_connected(3, 3));
        let c = Cell::new(1, 1);
        lights.flip();
        lights.set_signal(c, Some(LightPhase::VerticalPriority));
        assert_eq!(lights.phase(c), Some(LightPhase::VerticalPriority));
        lights.flip();
        assert_eq!(lights.phase(c), Some(LightPhase::HorizontalPriority));
        lights.set_signal(c, None);
        assert!(!lights.has_signal(c));
    }
}
