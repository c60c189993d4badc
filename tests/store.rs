//! Integration tests for `src/store/`.

#[path = "store/merge_queue_test.rs"]
mod merge_queue_test;
#[path = "store/misc_test.rs"]
mod misc_test;
#[path = "store/runs_test.rs"]
mod runs_test;
#[path = "store/tasks_test.rs"]
mod tasks_test;
#[path = "store/util.rs"]
mod util;
