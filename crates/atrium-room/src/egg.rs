//! The egg mini-game.
//!
//! Garden rooms carry a fixed pool of eggs scattered at creation. A
//! periodic task marks a few unmarked eggs each tick and announces them;
//! peers race to clear marked eggs, and each clear credits the clearing
//! peer's equipment.

use std::sync::Arc;
use std::time::Duration;

use atrium_protocol::{EggId, EggSummary, RoomId};
use rand::seq::IteratorRandom;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::RoomRegistry;

pub const POOL_SIZE: u32 = 24;
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);
pub const MAX_MARKS_PER_TICK: usize = 3;

/// Horizontal extent of the garden map; eggs land anywhere inside it,
/// on the ground plane.
const MAP_HALF_EXTENT: f32 = 40.0;

#[derive(Debug, Clone)]
pub struct EggEntity {
    pub id: EggId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub marked: bool,
}

impl EggEntity {
    fn summary(&self) -> EggSummary {
        EggSummary {
            id: self.id,
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }
}

/// One room's egg pool and tick logic. The pool never grows or shrinks;
/// eggs only flip between marked and unmarked.
#[derive(Debug)]
pub struct EggBroadcaster {
    eggs: Vec<EggEntity>,
}

impl EggBroadcaster {
    /// Scatters the full pool uniformly inside the map bounds.
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let eggs = (0..POOL_SIZE)
            .map(|i| EggEntity {
                id: EggId(i),
                x: rng.random_range(-MAP_HALF_EXTENT..=MAP_HALF_EXTENT),
                y: 0.0,
                z: rng.random_range(-MAP_HALF_EXTENT..=MAP_HALF_EXTENT),
                marked: false,
            })
            .collect();
        Self { eggs }
    }

    pub fn unmarked_count(&self) -> usize {
        self.eggs.iter().filter(|e| !e.marked).count()
    }

    /// Marks up to `min(3, unmarked, random 1..=3)` distinct eggs and
    /// returns them with the post-tick unmarked count. `None` when every
    /// egg is already marked (nothing to announce).
    pub fn tick(&mut self) -> Option<(Vec<EggSummary>, usize)> {
        let mut rng = rand::rng();
        let unmarked: Vec<usize> = self
            .eggs
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.marked)
            .map(|(i, _)| i)
            .collect();
        if unmarked.is_empty() {
            return None;
        }

        let k = rng
            .random_range(1..=MAX_MARKS_PER_TICK)
            .min(unmarked.len());
        let chosen = unmarked.into_iter().choose_multiple(&mut rng, k);

        let mut marked = Vec::with_capacity(k);
        for index in chosen {
            self.eggs[index].marked = true;
            marked.push(self.eggs[index].summary());
        }
        Some((marked, self.unmarked_count()))
    }

    /// Flips a marked egg back to unmarked. `Some(remaining_unmarked)`
    /// for the one caller that wins; unknown ids and already-unmarked
    /// eggs yield `None`, which resolves concurrent clear races.
    pub fn clear(&mut self, id: EggId) -> Option<usize> {
        let egg = self.eggs.iter_mut().find(|e| e.id == id)?;
        if !egg.marked {
            return None;
        }
        egg.marked = false;
        Some(self.unmarked_count())
    }

    #[cfg(test)]
    pub(crate) fn mark_all(&mut self) {
        for egg in &mut self.eggs {
            egg.marked = true;
        }
    }
}

impl Default for EggBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the periodic tick for one room until the room disappears.
///
/// The handle is stored on the room and aborted at deletion, so the
/// "room gone" exit only covers deletion racing a tick.
pub fn spawn_broadcast_task(
    registry: Arc<Mutex<RoomRegistry>>,
    room_id: RoomId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(
            tokio::time::MissedTickBehavior::Delay,
        );
        // The first interval tick fires immediately; skip it so eggs
        // start appearing one period after room creation.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !registry.lock().await.tick_room_eggs(room_id) {
                tracing::debug!(%room_id, "egg task exiting, room gone");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pool_is_full_and_unmarked() {
        let eggs = EggBroadcaster::new();
        assert_eq!(eggs.unmarked_count(), POOL_SIZE as usize);
    }

    #[test]
    fn test_tick_marks_between_one_and_three_eggs() {
        for _ in 0..20 {
            let mut eggs = EggBroadcaster::new();
            let (marked, remaining) = eggs.tick().unwrap();
            assert!((1..=MAX_MARKS_PER_TICK).contains(&marked.len()));
            assert_eq!(
                remaining,
                POOL_SIZE as usize - marked.len(),
            );
        }
    }

    #[test]
    fn test_tick_marks_distinct_eggs() {
        let mut eggs = EggBroadcaster::new();
        let (marked, _) = eggs.tick().unwrap();
        let mut ids: Vec<u32> = marked.iter().map(|e| e.id.0).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), marked.len());
    }

    #[test]
    fn test_tick_with_no_unmarked_eggs_is_none() {
        let mut eggs = EggBroadcaster::new();
        eggs.mark_all();
        assert!(eggs.tick().is_none());
    }

    #[test]
    fn test_tick_drains_pool_to_exhaustion() {
        let mut eggs = EggBroadcaster::new();
        while eggs.tick().is_some() {}
        assert_eq!(eggs.unmarked_count(), 0);
    }

    #[test]
    fn test_clear_succeeds_once_per_mark() {
        let mut eggs = EggBroadcaster::new();
        let (marked, _) = eggs.tick().unwrap();
        let id = marked[0].id;

        assert!(eggs.clear(id).is_some());
        // Second clear of the same egg loses the race.
        assert!(eggs.clear(id).is_none());
    }

    #[test]
    fn test_clear_unknown_egg_is_none() {
        let mut eggs = EggBroadcaster::new();
        assert!(eggs.clear(EggId(999)).is_none());
    }

    #[test]
    fn test_cleared_egg_can_be_marked_again() {
        let mut eggs = EggBroadcaster::new();
        eggs.mark_all();
        let cleared = eggs.clear(EggId(0)).unwrap();
        assert_eq!(cleared, 1);

        let (marked, remaining) = eggs.tick().unwrap();
        assert_eq!(marked[0].id, EggId(0));
        assert_eq!(remaining, 0);
    }
}
