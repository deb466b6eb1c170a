//! Rules content editor.
//!
//! The published rules are a shallow tree, category → subcategory → rule,
//! stored as one JSON document in a single backend row. The editor holds the
//! whole tree in memory, mutates it optimistically, and writes it back in one
//! overwrite when the admin saves. There is no merge: the last save wins.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BackendError, RulesError};
use crate::identity::{IdentityProvider, SubjectId};

/// Role required to open the editor.
pub const ADMIN_ROLE: &str = "admin";

const NEW_CATEGORY_TITLE: &str = "New Category";
const NEW_SUBCATEGORY_TITLE: &str = "New Subcategory";
const NEW_SUBCATEGORY_DESCRIPTION: &str = "The rules in this section are listed below.";
const NEW_RULE_TITLE: &str = "New Rule";
const NEW_RULE_DESCRIPTION: &str = "Rule description goes here.";

/// Display format of a rule's last-update date.
const LAST_UPDATE_FORMAT: &str = "%d.%m.%Y";

/// A single rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
}

/// A group of rules inside a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubCategory {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A top-level category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainCategory {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub sub_categories: Vec<SubCategory>,
}

/// The stored rules row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Vec<MainCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

/// Field changes for a category. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct CategoryPatch {
    pub title: Option<String>,
}

/// Field changes for a subcategory.
#[derive(Debug, Clone, Default)]
pub struct SubCategoryPatch {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Field changes for a rule.
#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Where the rules row lives.
#[async_trait::async_trait]
pub trait RulesRepository: Send + Sync + 'static {
    /// Load the rules row, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the row could not be read.
    async fn load(&self) -> Result<Option<RulesDocument>, BackendError>;

    /// Overwrite the tree of row `id`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the write failed.
    async fn save(
        &self,
        id: &str,
        data: &[MainCategory],
        updated_by: Option<&SubjectId>,
    ) -> Result<(), BackendError>;
}

/// In-memory editor over the rules tree.
#[derive(Debug, Clone, Default)]
pub struct RulesEditor {
    rules_id: Option<String>,
    categories: Vec<MainCategory>,
    last_updated: Option<String>,
    dirty: bool,
}

impl RulesEditor {
    /// Check that `subject` is an admin, then load the rules row.
    ///
    /// # Errors
    ///
    /// - [`RulesError::NotSignedIn`] if there is no session to check with.
    /// - [`RulesError::Forbidden`] if the role check fails or says no.
    /// - [`RulesError::Backend`] if loading fails.
    pub async fn open(
        identity: &dyn IdentityProvider,
        subject: &SubjectId,
        repo: &dyn RulesRepository,
    ) -> Result<Self, RulesError> {
        match identity.has_role(subject, ADMIN_ROLE).await {
            Ok(true) => {}
            Ok(false) => return Err(RulesError::Forbidden),
            Err(BackendError::NotSignedIn) => return Err(RulesError::NotSignedIn),
            Err(e) => {
                info!(subject = %subject, error = %e, "admin role check failed");
                return Err(RulesError::Forbidden);
            }
        }

        let editor = repo
            .load()
            .await?
            .map_or_else(Self::default, Self::from_document);
        info!(
            subject = %subject,
            categories = editor.categories.len(),
            rules = editor.total_rules(),
            "rules loaded"
        );
        Ok(editor)
    }

    /// Build an editor over an already loaded row.
    #[must_use]
    pub fn from_document(doc: RulesDocument) -> Self {
        Self {
            rules_id: doc.id,
            categories: doc.data,
            last_updated: doc.updated_at,
            dirty: false,
        }
    }

    #[must_use]
    pub fn rules_id(&self) -> Option<&str> {
        self.rules_id.as_deref()
    }

    #[must_use]
    pub fn categories(&self) -> &[MainCategory] {
        &self.categories
    }

    #[must_use]
    pub fn last_updated(&self) -> Option<&str> {
        self.last_updated.as_deref()
    }

    /// Whether there are changes not yet saved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of rules across the whole tree.
    #[must_use]
    pub fn total_rules(&self) -> usize {
        self.categories
            .iter()
            .flat_map(|c| &c.sub_categories)
            .map(|s| s.rules.len())
            .sum()
    }

    /// Replace the whole tree, e.g. from an import.
    pub fn replace(&mut self, categories: Vec<MainCategory>) {
        self.categories = categories;
        self.dirty = true;
    }

    /// Append a category with default title. Returns its id.
    pub fn add_category(&mut self) -> String {
        let id = next_id(None, self.categories.iter().map(|c| c.id.as_str()));
        self.categories.push(MainCategory {
            id: id.clone(),
            title: NEW_CATEGORY_TITLE.to_owned(),
            sub_categories: Vec::new(),
        });
        self.dirty = true;
        id
    }

    /// # Errors
    ///
    /// Returns [`RulesError::NotFound`] for an unknown category.
    pub fn update_category(&mut self, id: &str, patch: CategoryPatch) -> Result<(), RulesError> {
        let category = self.category_mut(id)?;
        if let Some(title) = patch.title {
            category.title = title;
        }
        self.dirty = true;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RulesError::NotFound`] for an unknown category.
    pub fn delete_category(&mut self, id: &str) -> Result<(), RulesError> {
        let before = self.categories.len();
        self.categories.retain(|c| c.id != id);
        if self.categories.len() == before {
            return Err(not_found("category", id));
        }
        self.dirty = true;
        Ok(())
    }

    /// Append a subcategory with default texts. Returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::NotFound`] for an unknown category.
    pub fn add_subcategory(&mut self, category_id: &str) -> Result<String, RulesError> {
        let category = self.category_mut(category_id)?;
        let id = next_id(
            Some(category_id),
            category.sub_categories.iter().map(|s| s.id.as_str()),
        );
        category.sub_categories.push(SubCategory {
            id: id.clone(),
            title: NEW_SUBCATEGORY_TITLE.to_owned(),
            description: Some(NEW_SUBCATEGORY_DESCRIPTION.to_owned()),
            rules: Vec::new(),
        });
        self.dirty = true;
        Ok(id)
    }

    /// # Errors
    ///
    /// Returns [`RulesError::NotFound`] for an unknown category or subcategory.
    pub fn update_subcategory(
        &mut self,
        category_id: &str,
        subcategory_id: &str,
        patch: SubCategoryPatch,
    ) -> Result<(), RulesError> {
        let sub = self.subcategory_mut(category_id, subcategory_id)?;
        if let Some(title) = patch.title {
            sub.title = title;
        }
        if let Some(description) = patch.description {
            sub.description = Some(description);
        }
        self.dirty = true;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RulesError::NotFound`] for an unknown category or subcategory.
    pub fn delete_subcategory(
        &mut self,
        category_id: &str,
        subcategory_id: &str,
    ) -> Result<(), RulesError> {
        let category = self.category_mut(category_id)?;
        let before = category.sub_categories.len();
        category.sub_categories.retain(|s| s.id != subcategory_id);
        if category.sub_categories.len() == before {
            return Err(not_found("subcategory", subcategory_id));
        }
        self.dirty = true;
        Ok(())
    }

    /// Append a rule with default texts, stamped with `today`. Returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::NotFound`] for an unknown category or subcategory.
    pub fn add_rule(
        &mut self,
        category_id: &str,
        subcategory_id: &str,
        today: NaiveDate,
    ) -> Result<String, RulesError> {
        let sub = self.subcategory_mut(category_id, subcategory_id)?;
        let id = next_id(Some(subcategory_id), sub.rules.iter().map(|r| r.id.as_str()));
        sub.rules.push(Rule {
            id: id.clone(),
            title: NEW_RULE_TITLE.to_owned(),
            description: NEW_RULE_DESCRIPTION.to_owned(),
            last_update: Some(format_day(today)),
        });
        self.dirty = true;
        Ok(id)
    }

    /// Apply `patch` to a rule and restamp its last-update date.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::NotFound`] if any id does not resolve.
    pub fn update_rule(
        &mut self,
        category_id: &str,
        subcategory_id: &str,
        rule_id: &str,
        patch: RulePatch,
        today: NaiveDate,
    ) -> Result<(), RulesError> {
        let sub = self.subcategory_mut(category_id, subcategory_id)?;
        let rule = sub
            .rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| not_found("rule", rule_id))?;
        if let Some(title) = patch.title {
            rule.title = title;
        }
        if let Some(description) = patch.description {
            rule.description = description;
        }
        rule.last_update = Some(format_day(today));
        self.dirty = true;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RulesError::NotFound`] if any id does not resolve.
    pub fn delete_rule(
        &mut self,
        category_id: &str,
        subcategory_id: &str,
        rule_id: &str,
    ) -> Result<(), RulesError> {
        let sub = self.subcategory_mut(category_id, subcategory_id)?;
        let before = sub.rules.len();
        sub.rules.retain(|r| r.id != rule_id);
        if sub.rules.len() == before {
            return Err(not_found("rule", rule_id));
        }
        self.dirty = true;
        Ok(())
    }

    /// Overwrite the stored row with the in-memory tree.
    ///
    /// # Errors
    ///
    /// - [`RulesError::NotLoaded`] if no row was loaded.
    /// - [`RulesError::Backend`] if the write fails; the tree stays dirty.
    pub async fn save(
        &mut self,
        repo: &dyn RulesRepository,
        updated_by: Option<&SubjectId>,
        now: DateTime<Utc>,
    ) -> Result<(), RulesError> {
        let id = self.rules_id.as_deref().ok_or(RulesError::NotLoaded)?;
        repo.save(id, &self.categories, updated_by).await?;

        self.last_updated = Some(now.to_rfc3339_opts(SecondsFormat::Millis, true));
        self.dirty = false;
        info!(rules_id = %id, rules = self.total_rules(), "rules saved");
        Ok(())
    }

    // --- Private ---

    fn category_mut(&mut self, id: &str) -> Result<&mut MainCategory, RulesError> {
        self.categories
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found("category", id))
    }

    fn subcategory_mut(
        &mut self,
        category_id: &str,
        subcategory_id: &str,
    ) -> Result<&mut SubCategory, RulesError> {
        self.category_mut(category_id)?
            .sub_categories
            .iter_mut()
            .find(|s| s.id == subcategory_id)
            .ok_or_else(|| not_found("subcategory", subcategory_id))
    }
}

fn not_found(kind: &'static str, id: &str) -> RulesError {
    RulesError::NotFound {
        kind,
        id: id.to_owned(),
    }
}

fn format_day(day: NaiveDate) -> String {
    day.format(LAST_UPDATE_FORMAT).to_string()
}

/// Next sibling id: `<parent>.<n>` (or `<n>` at the top), with `n` one past
/// the largest numeric suffix among `siblings`.
fn next_id<'a>(parent: Option<&str>, siblings: impl Iterator<Item = &'a str>) -> String {
    let n = siblings
        .filter_map(|id| id.rsplit('.').next())
        .filter_map(|last| last.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
        .saturating_add(1);
    match parent {
        Some(parent) => format!("{parent}.{n}"),
        None => n.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::watch;

    use super::*;
    use crate::identity::AuthState;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 9).unwrap()
    }

    fn sample() -> RulesDocument {
        serde_json::from_value(serde_json::json!({
            "id": "row-1",
            "updated_at": "2025-01-01T00:00:00Z",
            "data": [{
                "id": "1",
                "title": "General",
                "subCategories": [{
                    "id": "1.1",
                    "title": "Conduct",
                    "description": "Be kind.",
                    "rules": [
                        { "id": "1.1.1", "title": "No spam", "description": "Do not spam.", "lastUpdate": "01.01.2025" },
                        { "id": "1.1.2", "title": "No ads", "description": "Do not advertise." }
                    ]
                }]
            }]
        }))
        .unwrap()
    }

    struct FakeRepo {
        doc: Option<RulesDocument>,
        saved: Mutex<Vec<(String, Vec<MainCategory>, Option<String>)>>,
        fail: bool,
    }

    impl FakeRepo {
        fn new(doc: Option<RulesDocument>) -> Self {
            Self {
                doc,
                saved: Mutex::new(Vec::new()),
                fail: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl RulesRepository for FakeRepo {
        async fn load(&self) -> Result<Option<RulesDocument>, BackendError> {
            Ok(self.doc.clone())
        }

        async fn save(
            &self,
            id: &str,
            data: &[MainCategory],
            updated_by: Option<&SubjectId>,
        ) -> Result<(), BackendError> {
            if self.fail {
                return Err(BackendError::Api {
                    status: 500,
                    message: "boom".to_owned(),
                });
            }
            self.saved.lock().unwrap().push((
                id.to_owned(),
                data.to_vec(),
                updated_by.map(ToString::to_string),
            ));
            Ok(())
        }
    }

    struct Roles(Result<bool, BackendError>);

    #[async_trait::async_trait]
    impl IdentityProvider for Roles {
        fn subscribe(&self) -> watch::Receiver<AuthState> {
            watch::channel(AuthState::SignedOut).1
        }

        async fn access_token(&self) -> Option<String> {
            None
        }

        async fn has_role(&self, _user: &SubjectId, role: &str) -> Result<bool, BackendError> {
            assert_eq!(role, ADMIN_ROLE);
            self.0.clone()
        }
    }

    #[test]
    fn document_json_uses_stored_field_names() {
        let doc = sample();
        assert_eq!(
            doc.data[0].sub_categories[0].rules[0].last_update.as_deref(),
            Some("01.01.2025")
        );
        let json = serde_json::to_value(&doc.data).unwrap();
        assert!(json[0].get("subCategories").is_some());
        assert!(json[0]["subCategories"][0]["rules"][1].get("lastUpdate").is_none());
    }

    #[tokio::test]
    async fn open_requires_admin_role() {
        let repo = FakeRepo::new(Some(sample()));
        let subject = SubjectId::new("u1");

        let denied = RulesEditor::open(&Roles(Ok(false)), &subject, &repo).await;
        assert!(matches!(denied, Err(RulesError::Forbidden)));

        let failed = RulesEditor::open(
            &Roles(Err(BackendError::Transport {
                reason: "offline".to_owned(),
            })),
            &subject,
            &repo,
        )
        .await;
        assert!(matches!(failed, Err(RulesError::Forbidden)));

        let signed_out =
            RulesEditor::open(&Roles(Err(BackendError::NotSignedIn)), &subject, &repo).await;
        assert!(matches!(signed_out, Err(RulesError::NotSignedIn)));

        let editor = RulesEditor::open(&Roles(Ok(true)), &subject, &repo).await.unwrap();
        assert_eq!(editor.rules_id(), Some("row-1"));
        assert_eq!(editor.total_rules(), 2);
        assert!(!editor.is_dirty());
    }

    #[tokio::test]
    async fn missing_row_opens_empty_and_cannot_save() {
        let repo = FakeRepo::new(None);
        let mut editor = RulesEditor::open(&Roles(Ok(true)), &SubjectId::new("u1"), &repo)
            .await
            .unwrap();
        assert!(editor.categories().is_empty());

        editor.add_category();
        let err = editor.save(&repo, None, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RulesError::NotLoaded));
    }

    #[test]
    fn new_nodes_get_hierarchical_ids() {
        let mut editor = RulesEditor::from_document(sample());

        assert_eq!(editor.add_category(), "2");
        assert_eq!(editor.add_subcategory("1").unwrap(), "1.2");
        assert_eq!(editor.add_rule("1", "1.1", day()).unwrap(), "1.1.3");

        let sub = &editor.categories()[0].sub_categories[1];
        assert_eq!(sub.title, NEW_SUBCATEGORY_TITLE);
        assert_eq!(sub.description.as_deref(), Some(NEW_SUBCATEGORY_DESCRIPTION));
        let rule = &editor.categories()[0].sub_categories[0].rules[2];
        assert_eq!(rule.last_update.as_deref(), Some("09.01.2025"));
        assert!(editor.is_dirty());
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let mut editor = RulesEditor::from_document(sample());
        editor.delete_rule("1", "1.1", "1.1.1").unwrap();
        assert_eq!(editor.add_rule("1", "1.1", day()).unwrap(), "1.1.3");
    }

    #[test]
    fn update_rule_restamps_date() {
        let mut editor = RulesEditor::from_document(sample());
        editor
            .update_rule(
                "1",
                "1.1",
                "1.1.2",
                RulePatch {
                    title: Some("No advertising".to_owned()),
                    description: None,
                },
                day(),
            )
            .unwrap();

        let rule = &editor.categories()[0].sub_categories[0].rules[1];
        assert_eq!(rule.title, "No advertising");
        assert_eq!(rule.description, "Do not advertise.");
        assert_eq!(rule.last_update.as_deref(), Some("09.01.2025"));
    }

    #[test]
    fn updates_and_deletes_report_unknown_ids() {
        let mut editor = RulesEditor::from_document(sample());
        assert!(matches!(
            editor.update_category("9", CategoryPatch::default()),
            Err(RulesError::NotFound { kind: "category", .. })
        ));
        assert!(matches!(
            editor.delete_subcategory("1", "1.9"),
            Err(RulesError::NotFound { kind: "subcategory", .. })
        ));
        assert!(matches!(
            editor.delete_rule("1", "1.1", "1.1.9"),
            Err(RulesError::NotFound { kind: "rule", .. })
        ));
        assert!(!editor.is_dirty());
    }

    #[test]
    fn deleting_a_category_drops_its_subtree() {
        let mut editor = RulesEditor::from_document(sample());
        editor
            .update_subcategory(
                "1",
                "1.1",
                SubCategoryPatch {
                    title: None,
                    description: Some("Updated.".to_owned()),
                },
            )
            .unwrap();
        editor.delete_category("1").unwrap();
        assert_eq!(editor.total_rules(), 0);
        assert!(editor.categories().is_empty());
    }

    #[tokio::test]
    async fn save_overwrites_row_and_clears_dirty() {
        let repo = FakeRepo::new(Some(sample()));
        let mut editor = RulesEditor::from_document(sample());
        editor
            .update_category(
                "1",
                CategoryPatch {
                    title: Some("Basics".to_owned()),
                },
            )
            .unwrap();

        let now = DateTime::parse_from_rfc3339("2025-01-09T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        editor
            .save(&repo, Some(&SubjectId::new("u1")), now)
            .await
            .unwrap();

        let saved = repo.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "row-1");
        assert_eq!(saved[0].1[0].title, "Basics");
        assert_eq!(saved[0].2.as_deref(), Some("u1"));
        assert!(!editor.is_dirty());
        assert_eq!(editor.last_updated(), Some("2025-01-09T10:00:00.000Z"));
    }

    #[tokio::test]
    async fn failed_save_keeps_changes_dirty() {
        let mut repo = FakeRepo::new(Some(sample()));
        repo.fail = true;
        let mut editor = RulesEditor::from_document(sample());
        editor.add_category();

        let err = editor.save(&repo, None, Utc::now()).await.unwrap_err();

        assert!(matches!(err, RulesError::Backend(_)));
        assert!(editor.is_dirty());
        assert_eq!(editor.last_updated(), Some("2025-01-01T00:00:00Z"));
    }
}
