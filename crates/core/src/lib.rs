pub mod activity;
pub mod error;
pub mod half_term;
pub mod ids;
pub mod lesson;
pub mod lesson_number;
pub mod partition;
pub mod plan;
pub mod stack;

pub use activity::{Activity, Resources};
pub use error::CoreError;
pub use half_term::{HalfTerm, HalfTermId, TermHint};
pub use ids::*;
pub use lesson::{LessonData, LessonDraft};
pub use lesson_number::LessonNumber;
pub use partition::Partition;
pub use plan::{LessonPlan, PlanStatus, Unit};
pub use stack::ActivityStack;
