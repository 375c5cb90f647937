//! Step outcomes shared by [`crate::reader::Reader`] and
//! [`crate::writer::Writer`] (§4.3.2).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    InProgress,
    Finished,
    Failed,
}
