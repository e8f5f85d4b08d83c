use std::time::Duration;

use jobboss_sched::{Resource, arg};
use serde_json::json;

pub(super) fn resource() -> Resource {
    Resource::new().action("snooze", |args| {
        let secs: u64 = arg(args, 0)?;
        std::thread::sleep(Duration::from_secs(secs));
        Ok(json!("ZzZzZzzz"))
    })
}
