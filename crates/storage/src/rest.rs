//! Remote mirror over a PostgREST-style HTTP API. Every table is scoped by
//! `user_id`; upserts use `on_conflict` with merge-duplicates resolution.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use lessonsync_core::{
    Activity, ActivityId, ActivityStack, HalfTerm, LessonData, LessonNumber, LessonPlan, PlanId,
    Resources, StackId, TenantId, Unit,
};

use crate::error::StorageError;
use crate::records::LessonSheet;
use crate::traits::RemoteStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

mod tables {
    pub const ACTIVITIES: &str = "activities";
    pub const LESSONS: &str = "lessons";
    pub const LESSON_PLANS: &str = "lesson_plans";
    pub const EYFS_STATEMENTS: &str = "eyfs_statements";
    pub const ACTIVITY_STACKS: &str = "activity_stacks";
    pub const HALF_TERMS: &str = "half_terms";
    pub const UNITS: &str = "units";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ActivityRow {
    id: ActivityId,
    activity: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    time: u32,
    category: String,
    #[serde(default)]
    lesson_number: Option<LessonNumber>,
    #[serde(default)]
    unit_name: Option<String>,
    #[serde(default)]
    year_groups: BTreeSet<String>,
    #[serde(default)]
    eyfs_standards: BTreeSet<String>,
    #[serde(default)]
    resources: Resources,
    user_id: TenantId,
}

impl ActivityRow {
    fn from_activity(activity: &Activity, tenant: &TenantId) -> Self {
        Self {
            id: activity.id.clone(),
            activity: activity.name.clone(),
            description: activity.description.clone(),
            time: activity.time,
            category: activity.category.clone(),
            lesson_number: activity.lesson_number,
            unit_name: activity.unit_name.clone(),
            year_groups: activity.year_groups.clone(),
            eyfs_standards: activity.standards.clone(),
            resources: activity.resources.clone(),
            user_id: tenant.clone(),
        }
    }

    fn into_activity(self) -> Activity {
        Activity {
            id: self.id,
            name: self.activity,
            description: self.description,
            time: self.time,
            resources: self.resources,
            category: self.category,
            year_groups: self.year_groups,
            standards: self.eyfs_standards,
            lesson_number: self.lesson_number,
            unit_name: self.unit_name,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LessonsRow {
    sheet_name: String,
    user_id: TenantId,
    #[serde(default)]
    data: BTreeMap<LessonNumber, LessonData>,
    #[serde(default)]
    lesson_numbers: Vec<LessonNumber>,
    #[serde(default)]
    teaching_units: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EyfsRow {
    sheet_name: String,
    user_id: TenantId,
    #[serde(default)]
    eyfs_statements: BTreeMap<LessonNumber, BTreeSet<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HalfTermsRow {
    sheet_name: String,
    user_id: TenantId,
    #[serde(default)]
    half_terms: Vec<HalfTerm>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnitsRow {
    sheet_name: String,
    user_id: TenantId,
    #[serde(default)]
    units: Vec<Unit>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlanRow {
    id: PlanId,
    user_id: TenantId,
    data: LessonPlan,
}

#[derive(Debug, Serialize, Deserialize)]
struct StackRow {
    id: StackId,
    user_id: TenantId,
    name: String,
    data: ActivityStack,
}

pub struct RestRemote {
    config: RestConfig,
    client: Client,
}

impl RestRemote {
    pub fn new(config: RestConfig) -> Result<Self, StorageError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref api_key) = config.api_key {
            let bearer = header::HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| StorageError::Unavailable(format!("invalid api key: {e}")))?;
            let raw = header::HeaderValue::from_str(api_key)
                .map_err(|e| StorageError::Unavailable(format!("invalid api key: {e}")))?;
            headers.insert(header::AUTHORIZATION, bearer);
            headers.insert("apikey", raw);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            table
        )
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, StorageError> {
        debug!(table, "remote select");
        let mut query: Vec<(&str, String)> = vec![("select", "*".to_string())];
        query.extend(filters.iter().map(|(k, v)| (*k, format!("eq.{v}"))));
        let response = self
            .client
            .get(self.table_url(table))
            .query(&query)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    async fn upsert<T: Serialize + Sync>(
        &self,
        table: &str,
        on_conflict: &str,
        rows: &[T],
    ) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }
        debug!(table, rows = rows.len(), "remote upsert");
        let response = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[(&str, String)]) -> Result<(), StorageError> {
        debug!(table, "remote delete");
        let query: Vec<(&str, String)> = filters
            .iter()
            .map(|(k, v)| (*k, format!("eq.{v}")))
            .collect();
        let response = self
            .client
            .delete(self.table_url(table))
            .query(&query)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, StorageError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Err(StorageError::NotFound(response.url().path().to_string()));
    }
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        return Err(StorageError::Server { status, message });
    }
    Ok(response)
}

fn tenant_filter(tenant: &TenantId) -> (&'static str, String) {
    ("user_id", tenant.to_string())
}

#[async_trait]
impl RemoteStore for RestRemote {
    async fn fetch_activities(&self, tenant: &TenantId) -> Result<Vec<Activity>, StorageError> {
        let rows: Vec<ActivityRow> = self
            .select(tables::ACTIVITIES, &[tenant_filter(tenant)])
            .await?;
        Ok(rows.into_iter().map(ActivityRow::into_activity).collect())
    }

    async fn upsert_activities(
        &self,
        tenant: &TenantId,
        activities: &[Activity],
    ) -> Result<(), StorageError> {
        let rows: Vec<ActivityRow> = activities
            .iter()
            .map(|a| ActivityRow::from_activity(a, tenant))
            .collect();
        self.upsert(
            tables::ACTIVITIES,
            "activity,category,lesson_number,user_id",
            &rows,
        )
        .await
    }

    async fn delete_activity(
        &self,
        tenant: &TenantId,
        activity: &Activity,
    ) -> Result<(), StorageError> {
        let mut filters = vec![
            tenant_filter(tenant),
            ("activity", activity.name.clone()),
            ("category", activity.category.clone()),
        ];
        if let Some(n) = activity.lesson_number {
            filters.push(("lesson_number", n.to_string()));
        }
        self.delete(tables::ACTIVITIES, &filters).await
    }

    async fn fetch_lessons(
        &self,
        tenant: &TenantId,
        sheet: &str,
    ) -> Result<Option<LessonSheet>, StorageError> {
        let filters = [tenant_filter(tenant), ("sheet_name", sheet.to_string())];
        let rows: Vec<LessonsRow> = self.select(tables::LESSONS, &filters).await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let eyfs: Vec<EyfsRow> = self.select(tables::EYFS_STATEMENTS, &filters).await?;

        let mut sheet = LessonSheet {
            all_lessons_data: row.data,
            lesson_numbers: row.lesson_numbers,
            teaching_units: row.teaching_units,
            lesson_standards: eyfs
                .into_iter()
                .next()
                .map(|r| r.eyfs_statements)
                .unwrap_or_default(),
        };
        sheet.reindex();
        Ok(Some(sheet))
    }

    async fn upsert_lessons(
        &self,
        tenant: &TenantId,
        sheet: &str,
        lessons: &LessonSheet,
    ) -> Result<(), StorageError> {
        let row = LessonsRow {
            sheet_name: sheet.to_string(),
            user_id: tenant.clone(),
            data: lessons.all_lessons_data.clone(),
            lesson_numbers: lessons.lesson_numbers.clone(),
            teaching_units: lessons.teaching_units.clone(),
        };
        self.upsert(tables::LESSONS, "sheet_name,user_id", &[row]).await
    }

    async fn upsert_eyfs_statements(
        &self,
        tenant: &TenantId,
        sheet: &str,
        statements: &BTreeMap<LessonNumber, BTreeSet<String>>,
    ) -> Result<(), StorageError> {
        let row = EyfsRow {
            sheet_name: sheet.to_string(),
            user_id: tenant.clone(),
            eyfs_statements: statements.clone(),
        };
        self.upsert(tables::EYFS_STATEMENTS, "sheet_name,user_id", &[row])
            .await
    }

    async fn fetch_half_terms(
        &self,
        tenant: &TenantId,
        sheet: &str,
    ) -> Result<Vec<HalfTerm>, StorageError> {
        let filters = [tenant_filter(tenant), ("sheet_name", sheet.to_string())];
        let rows: Vec<HalfTermsRow> = self.select(tables::HALF_TERMS, &filters).await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|r| r.half_terms)
            .unwrap_or_default())
    }

    async fn upsert_half_terms(
        &self,
        tenant: &TenantId,
        sheet: &str,
        half_terms: &[HalfTerm],
    ) -> Result<(), StorageError> {
        let row = HalfTermsRow {
            sheet_name: sheet.to_string(),
            user_id: tenant.clone(),
            half_terms: half_terms.to_vec(),
        };
        self.upsert(tables::HALF_TERMS, "sheet_name,user_id", &[row]).await
    }

    async fn fetch_units(&self, tenant: &TenantId, collection: &str) -> Result<Vec<Unit>, StorageError> {
        let filters = [tenant_filter(tenant), ("sheet_name", collection.to_string())];
        let rows: Vec<UnitsRow> = self.select(tables::UNITS, &filters).await?;
        Ok(rows.into_iter().next().map(|r| r.units).unwrap_or_default())
    }

    async fn upsert_units(
        &self,
        tenant: &TenantId,
        collection: &str,
        units: &[Unit],
    ) -> Result<(), StorageError> {
        let row = UnitsRow {
            sheet_name: collection.to_string(),
            user_id: tenant.clone(),
            units: units.to_vec(),
        };
        self.upsert(tables::UNITS, "sheet_name,user_id", &[row]).await
    }

    async fn fetch_lesson_plans(&self, tenant: &TenantId) -> Result<Vec<LessonPlan>, StorageError> {
        let rows: Vec<PlanRow> = self
            .select(tables::LESSON_PLANS, &[tenant_filter(tenant)])
            .await?;
        Ok(rows.into_iter().map(|r| r.data).collect())
    }

    async fn upsert_lesson_plans(
        &self,
        tenant: &TenantId,
        plans: &[LessonPlan],
    ) -> Result<(), StorageError> {
        let rows: Vec<PlanRow> = plans
            .iter()
            .map(|p| PlanRow {
                id: p.id.clone(),
                user_id: tenant.clone(),
                data: p.clone(),
            })
            .collect();
        self.upsert(tables::LESSON_PLANS, "id,user_id", &rows).await
    }

    async fn delete_lesson_plan(&self, tenant: &TenantId, id: &PlanId) -> Result<(), StorageError> {
        self.delete(
            tables::LESSON_PLANS,
            &[tenant_filter(tenant), ("id", id.to_string())],
        )
        .await
    }

    async fn fetch_stacks(&self, tenant: &TenantId) -> Result<Vec<ActivityStack>, StorageError> {
        let rows: Vec<StackRow> = self
            .select(tables::ACTIVITY_STACKS, &[tenant_filter(tenant)])
            .await?;
        Ok(rows.into_iter().map(|r| r.data).collect())
    }

    async fn upsert_stack(&self, tenant: &TenantId, stack: &ActivityStack) -> Result<(), StorageError> {
        let row = StackRow {
            id: stack.id,
            user_id: tenant.clone(),
            name: stack.name.clone(),
            data: stack.clone(),
        };
        self.upsert(tables::ACTIVITY_STACKS, "id,user_id", &[row]).await
    }

    async fn delete_stack(&self, tenant: &TenantId, id: StackId) -> Result<(), StorageError> {
        self.delete(
            tables::ACTIVITY_STACKS,
            &[tenant_filter(tenant), ("id", id.to_string())],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_url_trims_trailing_slash() -> Result<(), StorageError> {
        let remote = RestRemote::new(RestConfig {
            base_url: "https://example.test/".into(),
            api_key: Some("anon".into()),
            timeout_secs: 5,
        })?;
        assert_eq!(
            remote.table_url(tables::LESSONS),
            "https://example.test/rest/v1/lessons"
        );
        Ok(())
    }

    #[test]
    fn activity_row_uses_snake_case_columns() -> Result<(), serde_json::Error> {
        let mut activity = Activity::new("a1", "Hello Song", "Welcome", 5);
        activity.lesson_number = Some(LessonNumber::FIRST);
        activity.standards.insert("PSED".into());
        let tenant = TenantId::from("teacher-1");

        let json = serde_json::to_value(ActivityRow::from_activity(&activity, &tenant))?;
        assert_eq!(json["activity"], "Hello Song");
        assert_eq!(json["lesson_number"], "1");
        assert_eq!(json["user_id"], "teacher-1");
        assert_eq!(json["eyfs_standards"][0], "PSED");

        let back: ActivityRow = serde_json::from_value(json)?;
        assert_eq!(back.into_activity(), activity);
        Ok(())
    }
}
