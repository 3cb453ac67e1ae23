//! Diesel schema for the pipeline task store.

diesel::table! {
    /// Task identity records.
    tasks (task_id) {
        /// Opaque task identifier.
        #[max_length = 64]
        task_id -> Varchar,
        /// Submitting user.
        #[max_length = 255]
        user_id -> Varchar,
        /// Optional scheduled start.
        scheduled_time -> Nullable<Timestamptz>,
        /// Creation timestamp.
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Content rows mirroring pipeline progress.
    content (content_id) {
        /// Task identifier of the content.
        #[max_length = 64]
        content_id -> Varchar,
        /// Stage name, `completed`, or `failed`.
        #[max_length = 32]
        status -> Varchar,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// One live queue row per task.
    task_queue (task_id) {
        /// Task identifier.
        #[max_length = 64]
        task_id -> Varchar,
        /// Current stage.
        #[max_length = 16]
        stage -> Varchar,
        /// Status within the stage.
        #[max_length = 16]
        status -> Varchar,
        /// Creation timestamp used for claim ordering.
        created_at -> Timestamptz,
        /// Claim timestamp.
        started_at -> Nullable<Timestamptz>,
        /// Terminal timestamp.
        completed_at -> Nullable<Timestamptz>,
        /// Recorded error message.
        error -> Nullable<Text>,
        /// PID of the claiming worker.
        worker_pid -> Nullable<Int4>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(tasks, content, task_queue);
