//! Diesel schema for bug records.

diesel::table! {
    /// Bugs claimed by agent workers.
    bugs (id) {
        /// Auto-incremented identifier.
        id -> Int8,
        /// Short description.
        title -> Text,
        /// Lifecycle status.
        #[max_length = 16]
        status -> Varchar,
        /// Current assignee.
        #[max_length = 255]
        assigned_to -> Nullable<Varchar>,
        /// PID of the agent process.
        worker_pid -> Nullable<Int4>,
        /// Claim and history metadata.
        metadata -> Jsonb,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}
