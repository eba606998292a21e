//! Stage tracking for the streaming endpoint.
//!
//! Runtime events are attributed to one of three fixed stages by author
//! name. The tracker turns that into `active`/`done` transitions that only
//! move forward, mark every stage done exactly once, and never skip a stage.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Planner,
    Executor,
    Reviewer,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Planner, Stage::Executor, Stage::Reviewer];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Planner => "planner",
            Stage::Executor => "executor",
            Stage::Reviewer => "reviewer",
        }
    }

    /// Stage responsible for an event, by author-name substring.
    pub fn from_author(author: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| author.contains(s.as_str()))
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Active,
    Done,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Active => "active",
            StageStatus::Done => "done",
        }
    }
}

/// One `agent_status` event to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub stage: Stage,
    pub status: StageStatus,
}

impl Transition {
    fn active(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Active,
        }
    }

    fn done(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Done,
        }
    }
}

#[derive(Debug)]
pub struct StageTracker {
    current: Stage,
    done: [bool; 3],
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: Stage::Planner,
            done: [false; 3],
        }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    /// The transition emitted before the pipeline starts.
    pub fn start(&self) -> Transition {
        Transition::active(Stage::Planner)
    }

    fn mark_done(&mut self, stage: Stage, out: &mut Vec<Transition>) {
        if !self.done[stage.index()] {
            self.done[stage.index()] = true;
            out.push(Transition::done(stage));
        }
    }

    /// Attribute an event to a stage and return the boundary transitions.
    ///
    /// Authors that name no stage, or name an earlier one, stay with the
    /// current stage. A jump over a stage reports it active and done in turn.
    pub fn enter(&mut self, author: &str) -> Vec<Transition> {
        let mut out = Vec::new();
        let Some(next) = Stage::from_author(author) else {
            return out;
        };
        if next <= self.current {
            return out;
        }

        self.mark_done(self.current, &mut out);
        for skipped in &Stage::ALL[self.current.index() + 1..next.index()] {
            out.push(Transition::active(*skipped));
            self.mark_done(*skipped, &mut out);
        }
        out.push(Transition::active(next));
        self.current = next;
        out
    }

    /// The current stage produced its final response.
    pub fn complete(&mut self) -> Option<Transition> {
        let mut out = Vec::new();
        self.mark_done(self.current, &mut out);
        out.pop()
    }
}
