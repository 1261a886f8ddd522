//! Round-robin schedule builder (spec §4.G): the "circle" method, producing
//! per-participant ordered opponent sequences rather than a pairing set.

use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

/// Mutated only by "consume next pairing" (pop front) under an exclusive
/// lock (spec §3). Wraps the per-login sequences `build` produces.
pub struct Schedule {
    by_login: Mutex<HashMap<String, VecDeque<String>>>,
}

impl Schedule {
    pub fn new(participants: &[String], games_per_pair: u32) -> Self {
        Self { by_login: Mutex::new(build(participants, games_per_pair)) }
    }

    /// Pops and returns the next scheduled opponent for `login`, if any.
    pub async fn next_opponent(&self, login: &str) -> Option<String> {
        self.by_login.lock().await.get_mut(login)?.pop_front()
    }
}

/// Builds the round-robin schedule for an even-sized participant list.
/// `games_per_pair` repeats every pairing that many times within a round.
///
/// Panics if `participants.len()` is odd or zero — callers are expected to
/// pad an odd list with a "bye" entry before calling this (spec §4.G is
/// silent on byes; this crate only ever schedules registered participants).
pub fn build(participants: &[String], games_per_pair: u32) -> HashMap<String, VecDeque<String>> {
    let n = participants.len();
    assert!(n > 0 && n % 2 == 0, "participant list must be even and non-empty");

    let mut circle: Vec<String> = participants.to_vec();
    let mut schedule: HashMap<String, VecDeque<String>> =
        participants.iter().map(|p| (p.clone(), VecDeque::new())).collect();

    for _round in 0..n - 1 {
        for j in 0..n / 2 {
            let a = &circle[j];
            let b = &circle[n - 1 - j];
            for _ in 0..games_per_pair {
                schedule.get_mut(a).unwrap().push_back(b.clone());
                schedule.get_mut(b).unwrap().push_back(a.clone());
            }
        }
        // Rotate every element but the first one position.
        if n > 1 {
            let last = circle.pop().unwrap();
            circle.insert(1, last);
        }
    }

    schedule
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pair_is_scheduled_symmetrically() {
        let participants: Vec<String> =
            ["alice", "bob", "carol", "dave"].iter().map(|s| s.to_string()).collect();
        let schedule = build(&participants, 2);

        for a in &participants {
            for b in &participants {
                if a == b {
                    continue;
                }
                let count_a_vs_b = schedule[a].iter().filter(|x| *x == b).count();
                let count_b_vs_a = schedule[b].iter().filter(|x| *x == a).count();
                assert_eq!(count_a_vs_b, count_b_vs_a);
                assert_eq!(count_a_vs_b, 2);
            }
        }
    }

    #[test]
    fn six_participants_each_see_every_other_once_per_game() {
        let participants: Vec<String> =
            ["a", "b", "c", "d", "e", "f"].iter().map(|s| s.to_string()).collect();
        let schedule = build(&participants, 1);
        for login in &participants {
            let opponents: std::collections::HashSet<_> = schedule[login].iter().collect();
            assert_eq!(opponents.len(), participants.len() - 1);
        }
    }

    #[test]
    #[should_panic]
    fn odd_participant_count_panics() {
        build(&["a".to_string(), "b".to_string(), "c".to_string()], 1);
    }
}
