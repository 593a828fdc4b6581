//! Completion counts for progress bars.

use serde::Serialize;

use crate::task::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Whole-number percentage, rounded down and capped at 100; 0 for an
    /// empty tree.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        // Widened so huge counts cannot overflow.
        let share = (self.completed as u128 * 100) / self.total as u128;
        u8::try_from(share.min(100)).unwrap_or(100)
    }

    fn add(self, other: Progress) -> Progress {
        Progress {
            completed: self.completed + other.completed,
            total: self.total + other.total,
        }
    }
}

/// Count every node of the tree, branches included.
///
/// Each node is counted on its own flag: a completed parent with open
/// children contributes one completed and the children stay open.
pub fn aggregate(tree: &[Task]) -> Progress {
    tree.iter().fold(Progress::default(), |acc, task| {
        let own = Progress {
            completed: usize::from(task.completed),
            total: 1,
        };
        acc.add(own).add(aggregate(&task.subtasks))
    })
}
