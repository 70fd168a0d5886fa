//! Diesel table definitions
//!
//! Mirrors the DDL in `schema.rs`. SQLite has no native boolean or timestamp
//! type, so flags are INTEGER 0/1 and timestamps are RFC 3339 TEXT.

diesel::table! {
    courses (id) {
        id -> Text,
        owner_id -> Text,
        title -> Text,
        description -> Nullable<Text>,
        current_version -> Integer,
        lessons_json -> Text,
        accessibility_json -> Text,
        soft_deleted -> Integer,
        deleted_at -> Nullable<Text>,
        history_json -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    course_versions (course_id, version) {
        course_id -> Text,
        version -> Integer,
        lessons_json -> Text,
        changelog -> Text,
        update_type -> Text,
        editor_id -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    lesson_registry (lesson_id) {
        lesson_id -> Text,
        course_id -> Text,
        introduced_in -> Integer,
        retired_in -> Nullable<Integer>,
        last_duration_seconds -> Integer,
    }
}

diesel::table! {
    enrollments (id) {
        id -> Text,
        user_id -> Text,
        course_id -> Text,
        snapshot_json -> Text,
        snapshot_version -> Integer,
        enrolled_at -> Text,
        last_updated -> Text,
    }
}

diesel::table! {
    enrollment_progress (enrollment_id, lesson_id) {
        enrollment_id -> Text,
        lesson_id -> Text,
        completed -> Integer,
        updated_at -> Text,
    }
}

diesel::table! {
    progress_facts (id) {
        id -> Text,
        user_id -> Text,
        course_id -> Text,
        lesson_id -> Text,
        watch_seconds -> Integer,
        completed -> Integer,
        recorded_at -> Text,
    }
}

diesel::table! {
    sync_queue (id) {
        id -> Text,
        course_id -> Text,
        version -> Integer,
        status -> Text,
        rounds -> Integer,
        failed_ids_json -> Text,
        last_error -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    courses,
    course_versions,
    lesson_registry,
    enrollments,
    enrollment_progress,
    progress_facts,
    sync_queue,
);
