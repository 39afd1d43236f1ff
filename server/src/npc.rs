//! NPC agents and their scheduler.
//!
//! Agents run at game-tick rate: each tick decrements every agent's think
//! timer by `dt`, and an agent whose timer has run out takes one AI step.
//! The AI is a two-state machine: idle agents scan for a claimable mission,
//! agents on a mission roll against a rating-vs-difficulty success chance.
//! Each agent's step is an independent world transaction, so a long sweep
//! never starves player actions.

use rand::Rng;

use crate::world::World;

/// Agent ids start here so they never collide with session ids.
pub const NPC_ID_BASE: i32 = 1000;

/// Fixed pool of agent handles, cycled when spawning.
pub const NPC_HANDLES: [&str; 10] = [
    "Scarab", "Serpent", "Phoenix", "Raven", "Falcon", "Shadow", "Ghost", "Phantom", "Specter",
    "Wraith",
];

#[derive(Debug, Clone)]
pub struct NpcAgent {
    pub id: i32,
    pub handle: String,
    pub uplink_rating: i16,
    pub neuromancer_rating: i16,
    pub credits: i64,
    /// Current in-game connection target, 0 when idle.
    pub connected_ip: u32,
    pub bounce_path: Vec<u32>,
    /// Claimed mission id, 0 when idle.
    pub current_mission_id: i32,
    /// Seconds until the next AI step.
    pub think_timer: f32,
}

/// World-visible outcomes of an NPC scheduler pass, broadcast as
/// MISSION_UPDATE packets by the tick runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpcEvent {
    MissionClaimed { agent_id: i32, mission_id: i32 },
    MissionCompleted { agent_id: i32, mission_id: i32 },
}

/// Chance that an agent completes its mission on one attempt.
pub fn mission_success_probability(rating: i16, difficulty: i16) -> f64 {
    (0.5 + 0.1 * f64::from(rating - difficulty)).clamp(0.10, 0.90)
}

impl World {
    /// Spawns `count` agents with staggered think timers so they do not all
    /// wake on the same tick.
    pub fn spawn_npcs(&mut self, count: usize, rng: &mut impl Rng) {
        log::info!("spawning {count} NPC agents");
        for i in 0..count {
            let agent = NpcAgent {
                id: NPC_ID_BASE + self.agents.len() as i32,
                handle: NPC_HANDLES[i % NPC_HANDLES.len()].to_string(),
                uplink_rating: rng.gen_range(1..=5),
                neuromancer_rating: 0,
                credits: 1000 + (i as i64) * 500,
                connected_ip: 0,
                bounce_path: Vec::new(),
                current_mission_id: 0,
                think_timer: 5.0 + (i as f32) * 2.0,
            };
            log::info!(
                "created NPC {} (id {}, rating {})",
                agent.handle,
                agent.id,
                agent.uplink_rating
            );
            self.agents.push(agent);
        }
    }

    /// Runs one scheduler pass. `dt` is the game-tick duration in seconds.
    pub fn update_npcs(&mut self, dt: f32, rng: &mut impl Rng) -> Vec<NpcEvent> {
        let mut events = Vec::new();

        for idx in 0..self.agents.len() {
            self.agents[idx].think_timer -= dt;
            if self.agents[idx].think_timer > 0.0 {
                continue;
            }
            self.agents[idx].think_timer = rng.gen_range(10.0..30.0);

            let (agent_id, rating, mission_id) = {
                let agent = &self.agents[idx];
                (agent.id, agent.uplink_rating, agent.current_mission_id)
            };

            if mission_id == 0 {
                // Idle: claim the first mission within this agent's reach.
                let candidate = self
                    .missions
                    .iter()
                    .find(|m| m.claimed_by == 0 && !m.completed && m.difficulty <= rating)
                    .map(|m| m.id);
                if let Some(id) = candidate {
                    if self.claim_mission(id, agent_id) {
                        self.agents[idx].current_mission_id = id;
                        events.push(NpcEvent::MissionClaimed {
                            agent_id,
                            mission_id: id,
                        });
                    }
                }
            } else if let Some(event) = self.npc_attempt_mission(idx, rng) {
                events.push(event);
            }
        }

        events
    }

    /// One completion attempt for the agent at `idx`.
    pub(crate) fn npc_attempt_mission(
        &mut self,
        idx: usize,
        rng: &mut impl Rng,
    ) -> Option<NpcEvent> {
        let (agent_id, rating, mission_id) = {
            let agent = &self.agents[idx];
            (agent.id, agent.uplink_rating, agent.current_mission_id)
        };

        let (mission_completed, difficulty, payment) = match self.find_mission(mission_id) {
            Some(mission) => (mission.completed, mission.difficulty, mission.payment),
            None => {
                self.agents[idx].current_mission_id = 0;
                return None;
            }
        };
        if mission_completed {
            self.agents[idx].current_mission_id = 0;
            return None;
        }

        if rng.gen::<f64>() < mission_success_probability(rating, difficulty) {
            if !self.complete_mission(mission_id, agent_id) {
                return None;
            }
            let agent = &mut self.agents[idx];
            agent.credits += i64::from(payment);
            agent.current_mission_id = 0;
            log::info!(
                "NPC {} completed mission {mission_id}, earned {payment} credits",
                agent.handle
            );
            if rng.gen_range(0..3) == 0 {
                agent.uplink_rating += 1;
                log::info!("NPC {} rating increased to {}", agent.handle, agent.uplink_rating);
            }
            Some(NpcEvent::MissionCompleted {
                agent_id,
                mission_id,
            })
        } else {
            log::info!(
                "NPC {} failed mission {mission_id} attempt",
                self.agents[idx].handle
            );
            if rng.gen_range(0..10) == 0 {
                let agent = &mut self.agents[idx];
                agent.uplink_rating = (agent.uplink_rating - 1).max(0);
                log::info!(
                    "NPC {} traced, rating dropped to {}",
                    agent.handle,
                    agent.uplink_rating
                );
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{parse_ip, Mission};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mission(id: i32, difficulty: i16, payment: i32) -> Mission {
        Mission {
            id,
            kind: 1,
            target_ip: parse_ip("10.0.0.1").unwrap(),
            employer_id: 1,
            description: "trace a transfer".to_string(),
            payment,
            max_payment: payment,
            difficulty,
            min_rating: difficulty,
            claimed_by: 0,
            completed: false,
        }
    }

    #[test]
    fn spawn_staggers_agents() {
        let mut world = World::new();
        let mut rng = StdRng::seed_from_u64(1);
        world.spawn_npcs(5, &mut rng);

        assert_eq!(world.agents.len(), 5);
        for (i, agent) in world.agents.iter().enumerate() {
            assert_eq!(agent.id, NPC_ID_BASE + i as i32);
            assert!((1..=5).contains(&agent.uplink_rating));
            assert_eq!(agent.credits, 1000 + i as i64 * 500);
            assert!((agent.think_timer - (5.0 + i as f32 * 2.0)).abs() < f32::EPSILON);
            assert_eq!(agent.current_mission_id, 0);
        }
    }

    #[test]
    fn timers_only_fire_when_elapsed() {
        let mut world = World::new();
        let mut rng = StdRng::seed_from_u64(2);
        world.spawn_npcs(1, &mut rng);
        world.insert_mission(mission(1, 1, 100));
        world.agents[0].uplink_rating = 5;

        // One tick of 1/60s: timer started at 5s, nothing happens.
        let events = world.update_npcs(1.0 / 60.0, &mut rng);
        assert!(events.is_empty());
        assert_eq!(world.find_mission(1).unwrap().claimed_by, 0);

        // Burn through the full timer: the agent thinks and claims.
        let events = world.update_npcs(10.0, &mut rng);
        assert_eq!(
            events,
            vec![NpcEvent::MissionClaimed {
                agent_id: NPC_ID_BASE,
                mission_id: 1
            }]
        );
        assert_eq!(world.find_mission(1).unwrap().claimed_by, NPC_ID_BASE);
        assert_eq!(world.agents[0].current_mission_id, 1);

        // Timer was reset into [10, 30).
        assert!(world.agents[0].think_timer >= 10.0);
        assert!(world.agents[0].think_timer < 30.0);
    }

    #[test]
    fn idle_agent_skips_too_hard_missions() {
        let mut world = World::new();
        let mut rng = StdRng::seed_from_u64(3);
        world.spawn_npcs(1, &mut rng);
        world.agents[0].uplink_rating = 2;
        world.insert_mission(mission(1, 9, 1000));
        world.insert_mission(mission(2, 2, 100));

        world.update_npcs(10.0, &mut rng);
        assert_eq!(world.find_mission(1).unwrap().claimed_by, 0);
        assert_eq!(world.find_mission(2).unwrap().claimed_by, NPC_ID_BASE);
    }

    #[test]
    fn two_agents_cannot_claim_the_same_mission() {
        let mut world = World::new();
        let mut rng = StdRng::seed_from_u64(4);
        world.spawn_npcs(2, &mut rng);
        world.agents[0].uplink_rating = 5;
        world.agents[1].uplink_rating = 5;
        // Both timers expire in the same pass.
        world.agents[0].think_timer = 0.0;
        world.agents[1].think_timer = 0.0;
        world.insert_mission(mission(1, 1, 100));

        let events = world.update_npcs(0.1, &mut rng);
        let claims = events
            .iter()
            .filter(|e| matches!(e, NpcEvent::MissionClaimed { .. }))
            .count();
        assert_eq!(claims, 1);
    }

    #[test]
    fn vanished_mission_clears_agent_state() {
        let mut world = World::new();
        let mut rng = StdRng::seed_from_u64(5);
        world.spawn_npcs(1, &mut rng);
        world.agents[0].current_mission_id = 99;

        assert!(world.npc_attempt_mission(0, &mut rng).is_none());
        assert_eq!(world.agents[0].current_mission_id, 0);
    }

    #[test]
    fn success_probability_curve() {
        use assert_approx_eq::assert_approx_eq;

        assert_approx_eq!(mission_success_probability(3, 1), 0.7, 1e-9);
        assert_approx_eq!(mission_success_probability(1, 1), 0.5, 1e-9);
        // Clamped at both ends.
        assert_approx_eq!(mission_success_probability(10, 1), 0.9, 1e-9);
        assert_approx_eq!(mission_success_probability(1, 10), 0.1, 1e-9);
    }

    /// Rating 3 vs difficulty 1: p = 0.7. Over 10 000 independent attempts
    /// the completion count must land inside a generous 95% band.
    #[test]
    fn completion_rate_matches_probability() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut completions = 0u32;
        let trials = 10_000;

        for _ in 0..trials {
            let mut world = World::new();
            world.insert_mission(mission(1, 1, 500));
            world.agents.push(NpcAgent {
                id: NPC_ID_BASE,
                handle: "Scarab".to_string(),
                uplink_rating: 3,
                neuromancer_rating: 0,
                credits: 0,
                connected_ip: 0,
                bounce_path: Vec::new(),
                current_mission_id: 0,
                think_timer: 0.0,
            });
            assert!(world.claim_mission(1, NPC_ID_BASE));
            world.agents[0].current_mission_id = 1;

            if let Some(NpcEvent::MissionCompleted { .. }) =
                world.npc_attempt_mission(0, &mut rng)
            {
                completions += 1;
                assert_eq!(world.agents[0].credits, 500);
            }
        }

        // 95% CI around 7000 is roughly ±90; allow slack beyond that.
        assert!(
            (6850..=7150).contains(&completions),
            "completions {completions} outside expected band"
        );
    }
}
