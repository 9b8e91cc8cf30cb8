pub mod error;
pub mod hooks;
pub mod registry_bridge;

use runtime::core::function::FunctionSpec;
use runtime::core::handler_store::Language;

use error::{ServelessCoreError, ServelessCoreResult};

/// Maps the registry's stored `language` string onto the runtime's closed
/// `Language` enum. `image_name` is taken from the row as-is and is
/// authoritative — see spec's Open Question resolution in DESIGN.md.
pub fn parse_language(raw: &str) -> ServelessCoreResult<Language> {
    match raw {
        "python" => Ok(Language::Python),
        "javascript" => Ok(Language::Javascript),
        other => Err(ServelessCoreError::SystemError(format!(
            "unknown language '{other}'"
        ))),
    }
}

/// Converts a persisted function row into the plain struct the invocation
/// core operates on. Kept free of any back-reference to the row itself
/// (spec's cyclic-state design note): the core only ever sees `function_id`.
pub fn to_function_spec(model: &db_entities::function::Model) -> ServelessCoreResult<FunctionSpec> {
    Ok(FunctionSpec {
        id: model.id,
        route: model.route.clone(),
        language: parse_language(&model.language)?,
        timeout_seconds: model.timeout_seconds.max(0) as u64,
        image_name: model.image_name.clone(),
    })
}
