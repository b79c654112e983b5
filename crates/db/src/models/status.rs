//! Command status mapping to the `command_statuses` lookup table.
//!
//! Discriminants match the seed rows in
//! `20240301000001_create_command_statuses_table.sql`.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

/// Command lifecycle status.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Running = 1,
    Finished = 2,
    Error = 3,
}

impl CommandStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Lookup-table name, as exposed in API projections.
    pub fn name(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_match_seed_data() {
        assert_eq!(CommandStatus::Running.id(), 1);
        assert_eq!(CommandStatus::Finished.id(), 2);
        assert_eq!(CommandStatus::Error.id(), 3);
    }

    #[test]
    fn names_match_seed_data() {
        assert_eq!(CommandStatus::Running.name(), "running");
        assert_eq!(CommandStatus::Finished.name(), "finished");
        assert_eq!(CommandStatus::Error.name(), "error");
    }
}
