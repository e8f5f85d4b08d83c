use jobboss_sched::{ActionError, Resource};
use serde_json::{Value, json};

pub(super) fn resource() -> Resource {
    Resource::new().action("concatenate", |args| {
        let parts = args
            .iter()
            .map(|value| match value {
                Value::String(s) => Ok(s.as_str()),
                other => Err(ActionError::argument(format!("expected a string, got {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        // [joined, number of parts]
        Ok(json!([parts.concat(), parts.len()]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenate() {
        let registry = jobboss_sched::Registry::new().with_resource("string", resource());
        let action = registry.resolve_path("string#concatenate").unwrap();

        let result = action(&[json!("test"), json!("of"), json!("concatenation")]).unwrap();
        assert_eq!(result, json!(["testofconcatenation", 3]));

        let err = action(&[json!("a"), json!(1)]).unwrap_err();
        assert_eq!(err.class, "ArgumentError");
    }
}
