use std::collections::HashSet;

use crate::{
    catalog::{Difficulty, Problem},
    contest::{ContestProblem, RoomSettings},
};

#[derive(Debug, Clone)]
pub struct Selection {
    pub problems: Vec<ContestProblem>,
    pub requested: usize,
    pub placeholder: bool,
}

impl Selection {
    pub fn is_under_filled(&self) -> bool {
        !self.placeholder && self.problems.len() < self.requested
    }
}

/// Picks one published problem per slot in catalog order.
///
/// Each slot first looks for an unused problem of its requested difficulty
/// and otherwise takes any unused published problem. Once the catalog runs
/// out the session keeps the problems found so far; an empty result becomes
/// a single placeholder problem.
pub fn select_problems(catalog: &[Problem], settings: &RoomSettings, max_tasks: usize) -> Selection {
    let requested = usize::try_from(settings.task_count)
        .unwrap_or(0)
        .clamp(1, max_tasks.max(1));

    let published: Vec<&Problem> = catalog.iter().filter(|p| p.is_published()).collect();
    let mut used: HashSet<&str> = HashSet::new();
    let mut problems = Vec::with_capacity(requested);

    for slot in 0..requested {
        let wanted = slot_difficulty(settings, slot);
        let pick = published
            .iter()
            .find(|p| !used.contains(p.id.as_str()) && wanted.is_none_or(|d| p.difficulty == d))
            .or_else(|| published.iter().find(|p| !used.contains(p.id.as_str())));
        let Some(problem) = pick else {
            break;
        };
        used.insert(problem.id.as_str());
        problems.push(ContestProblem::from_problem(problem));
    }

    let placeholder = problems.is_empty();
    if placeholder {
        problems.push(ContestProblem::placeholder(settings.difficulty));
    }

    Selection {
        problems,
        requested,
        placeholder,
    }
}

fn slot_difficulty(settings: &RoomSettings, slot: usize) -> Option<Difficulty> {
    if settings.task_difficulties.is_empty() {
        settings.difficulty
    } else {
        Some(settings.task_difficulties[slot % settings.task_difficulties.len()])
    }
}
