//! Diesel schema for stage locks.

diesel::table! {
    /// One row per pipeline stage.
    task_lock (stage) {
        /// Stage name.
        #[max_length = 16]
        stage -> Varchar,
        /// Task holding the lock.
        #[max_length = 64]
        locked_by -> Nullable<Varchar>,
        /// When the lock was taken.
        locked_at -> Nullable<Timestamptz>,
        /// PID of the holding worker.
        worker_pid -> Nullable<Int4>,
    }
}
