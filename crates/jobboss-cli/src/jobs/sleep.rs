use std::time::Duration;

use jobboss_sched::{ActionError, Resource, arg};
use serde_json::json;

pub(super) fn resource() -> Resource {
    Resource::new()
        .action("sleep_for", |args| {
            let secs: f64 = arg(args, 0)?;
            let duration = Duration::try_from_secs_f64(secs)
                .map_err(|e| ActionError::argument(format!("invalid duration {secs}: {e}")))?;
            std::thread::sleep(duration);
            Ok(json!(secs))
        })
        .action("add_snoozes", |args| {
            let a: i64 = arg(args, 0)?;
            let b: i64 = arg(args, 1)?;
            Ok(json!(a + b))
        })
        .action("do_not_never_sleep", |_| {
            Err(ActionError::argument("I can't not do that, Dave."))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobboss_sched::Registry;

    #[test]
    fn test_sleep_actions() {
        let registry = Registry::new().with_resource("sleep", resource());

        let add = registry.resolve_path("sleep#add_snoozes").unwrap();
        assert_eq!(add(&[json!(2), json!(5)]).unwrap(), json!(7));

        let sleep_for = registry.resolve_path("sleep#sleep_for").unwrap();
        assert_eq!(sleep_for(&[json!(0)]).unwrap(), json!(0.0));
        assert!(sleep_for(&[json!(-1)]).is_err());

        let never = registry.resolve_path("sleep#do_not_never_sleep").unwrap();
        let err = never(&[]).unwrap_err();
        assert_eq!(err.class, "ArgumentError");
        assert_eq!(err.message, "I can't not do that, Dave.");
    }
}
