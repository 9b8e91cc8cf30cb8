use chrono::Utc;
use db_entities::metric::{ActiveModel, Column, Entity, Model};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr,
    EntityTrait, FromQueryResult, QueryFilter, QueryOrder, Set, Statement,
};
use serde::Serialize;

pub struct MetricDBRepo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSeriesPeriod {
    Hourly,
    Daily,
    Weekly,
}

impl TimeSeriesPeriod {
    /// Parses the `period` query parameter against a fixed whitelist. Per
    /// the resolved design note: the `TO_CHAR` format is never taken from
    /// user input or bound as a query parameter, only selected here from a
    /// small closed set and spliced into the SQL as a literal.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }

    fn to_char_format(self) -> &'static str {
        match self {
            TimeSeriesPeriod::Hourly => "YYYY-MM-DD HH24:00",
            TimeSeriesPeriod::Daily => "YYYY-MM-DD",
            TimeSeriesPeriod::Weekly => "IYYY-IW",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromQueryResult)]
pub struct MetricSummary {
    pub total_executions: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub avg_execution_time_ms: Option<f64>,
    pub min_execution_time_ms: Option<i64>,
    pub max_execution_time_ms: Option<i64>,
    pub avg_memory_usage_mb: Option<f64>,
    pub avg_cpu_usage_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, FromQueryResult)]
pub struct TimeSeriesPoint {
    pub bucket: String,
    pub total_executions: i64,
    pub avg_execution_time_ms: Option<f64>,
}

impl MetricDBRepo {
    pub async fn record(
        db: &DatabaseConnection,
        function_id: i32,
        execution_time_ms: i64,
        memory_usage_mb: Option<f64>,
        cpu_usage_percent: Option<f64>,
        status_code: i32,
        error: Option<String>,
        container_id: Option<String>,
        payload_size: i64,
    ) -> Result<Model, DbErr> {
        let model = ActiveModel {
            function_id: Set(function_id),
            timestamp: Set(Utc::now()),
            execution_time_ms: Set(execution_time_ms),
            memory_usage_mb: Set(memory_usage_mb),
            cpu_usage_percent: Set(cpu_usage_percent),
            status_code: Set(status_code),
            error: Set(error),
            container_id: Set(container_id),
            payload_size: Set(payload_size),
            additional_data: Set(None),
            ..Default::default()
        };
        model.insert(db).await
    }

    pub async fn list_by_function(
        db: &DatabaseConnection,
        function_id: i32,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::FunctionId.eq(function_id))
            .order_by_desc(Column::Timestamp)
            .all(db)
            .await
    }

    pub async fn summary_for_function(
        db: &DatabaseConnection,
        function_id: i32,
        days: Option<i64>,
    ) -> Result<MetricSummary, DbErr> {
        let days_filter = days
            .map(|d| format!("AND timestamp >= NOW() - INTERVAL '{d} days'"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT \
                COUNT(*) AS total_executions, \
                COUNT(*) FILTER (WHERE status_code = 0) AS success_count, \
                COUNT(*) FILTER (WHERE status_code != 0) AS error_count, \
                AVG(execution_time_ms) AS avg_execution_time_ms, \
                MIN(execution_time_ms) AS min_execution_time_ms, \
                MAX(execution_time_ms) AS max_execution_time_ms, \
                AVG(memory_usage_mb) AS avg_memory_usage_mb, \
                AVG(cpu_usage_percent) AS avg_cpu_usage_percent \
             FROM metrics WHERE function_id = $1 {days_filter}"
        );

        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            &sql,
            [function_id.into()],
        );

        MetricSummary::find_by_statement(stmt)
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound("no metrics for function".to_string()))
    }

    pub async fn summary_all(db: &DatabaseConnection) -> Result<MetricSummary, DbErr> {
        let sql = "SELECT \
                COUNT(*) AS total_executions, \
                COUNT(*) FILTER (WHERE status_code = 0) AS success_count, \
                COUNT(*) FILTER (WHERE status_code != 0) AS error_count, \
                AVG(execution_time_ms) AS avg_execution_time_ms, \
                MIN(execution_time_ms) AS min_execution_time_ms, \
                MAX(execution_time_ms) AS max_execution_time_ms, \
                AVG(memory_usage_mb) AS avg_memory_usage_mb, \
                AVG(cpu_usage_percent) AS avg_cpu_usage_percent \
             FROM metrics";

        let stmt = Statement::from_sql_and_values(DatabaseBackend::Postgres, sql, []);

        MetricSummary::find_by_statement(stmt)
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound("no metrics recorded".to_string()))
    }

    pub async fn timeseries_for_function(
        db: &DatabaseConnection,
        function_id: i32,
        period: TimeSeriesPeriod,
    ) -> Result<Vec<TimeSeriesPoint>, DbErr> {
        let format = period.to_char_format();
        let sql = format!(
            "SELECT \
                TO_CHAR(timestamp, '{format}') AS bucket, \
                COUNT(*) AS total_executions, \
                AVG(execution_time_ms) AS avg_execution_time_ms \
             FROM metrics WHERE function_id = $1 \
             GROUP BY bucket ORDER BY bucket"
        );

        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            &sql,
            [function_id.into()],
        );

        TimeSeriesPoint::find_by_statement(stmt).all(db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_parsing_rejects_unknown_values() {
        assert_eq!(TimeSeriesPeriod::parse("hourly"), Some(TimeSeriesPeriod::Hourly));
        assert_eq!(TimeSeriesPeriod::parse("daily"), Some(TimeSeriesPeriod::Daily));
        assert_eq!(TimeSeriesPeriod::parse("weekly"), Some(TimeSeriesPeriod::Weekly));
        assert_eq!(TimeSeriesPeriod::parse("'; DROP TABLE metrics;--"), None);
    }

    #[test]
    fn to_char_format_is_fixed_per_period() {
        assert_eq!(TimeSeriesPeriod::Hourly.to_char_format(), "YYYY-MM-DD HH24:00");
        assert_eq!(TimeSeriesPeriod::Daily.to_char_format(), "YYYY-MM-DD");
        assert_eq!(TimeSeriesPeriod::Weekly.to_char_format(), "IYYY-IW");
    }
}
