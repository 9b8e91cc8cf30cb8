use chrono::Utc;
use db_entities::function::{ActiveModel, Column, Entity, Model};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};

pub struct FunctionDBRepo;

impl FunctionDBRepo {
    pub async fn find_by_id(db: &DatabaseConnection, id: i32) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }

    pub async fn find_by_route(
        db: &DatabaseConnection,
        route: &str,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::Route.eq(route))
            .one(db)
            .await
    }

    pub async fn find_by_name(
        db: &DatabaseConnection,
        name: &str,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find().filter(Column::Name.eq(name)).one(db).await
    }

    pub async fn list(db: &DatabaseConnection) -> Result<Vec<Model>, DbErr> {
        Entity::find().all(db).await
    }

    pub async fn create(
        db: &DatabaseConnection,
        name: String,
        route: String,
        language: String,
        timeout_seconds: i32,
        image_name: String,
        code: String,
    ) -> Result<Model, DbErr> {
        let model = ActiveModel {
            name: Set(name),
            route: Set(canonicalize_route(&route)),
            language: Set(language),
            timeout_seconds: Set(timeout_seconds),
            image_name: Set(image_name),
            code: Set(code),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        model.insert(db).await
    }

    pub async fn update_code(
        db: &DatabaseConnection,
        id: i32,
        code: String,
    ) -> Result<Model, DbErr> {
        let existing = Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("function {id}")))?;
        let mut active: ActiveModel = existing.into();
        active.code = Set(code);
        active.update(db).await
    }

    pub async fn delete(db: &DatabaseConnection, id: i32) -> Result<(), DbErr> {
        Entity::delete_by_id(id).exec(db).await?;
        Ok(())
    }
}

/// Routes are stored with a leading `/`; this is the one canonicalization
/// point so callers never have to remember to do it themselves.
pub fn canonicalize_route(route: &str) -> String {
    if route.starts_with('/') {
        route.to_string()
    } else {
        format!("/{route}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_route_adds_leading_slash() {
        assert_eq!(canonicalize_route("echo"), "/echo");
        assert_eq!(canonicalize_route("/echo"), "/echo");
    }
}
