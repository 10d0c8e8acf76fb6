//! Status helper enum mapping to the SMALLSERIAL lookup table.
//!
//! Variant discriminants match the seed data order (1-based) in the
//! `spot_image_job_statuses` table. No magic numbers in queries:
//! always bind via [`JobStatus::id`].

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

/// Spot-image job execution status.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting for a lease holder.
    Queued = 1,
    /// Leased by a worker or a push delivery.
    Processing = 2,
    /// Terminal: an image was generated and stored.
    Succeeded = 3,
    /// Terminal: the retry ceiling was reached.
    Failed = 4,
}

impl JobStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Decode a database status ID.
    pub fn from_id(id: StatusId) -> Option<JobStatus> {
        match id {
            1 => Some(JobStatus::Queued),
            2 => Some(JobStatus::Processing),
            3 => Some(JobStatus::Succeeded),
            4 => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal statuses accept no further automatic transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl From<JobStatus> for StatusId {
    fn from(value: JobStatus) -> Self {
        value as StatusId
    }
}
