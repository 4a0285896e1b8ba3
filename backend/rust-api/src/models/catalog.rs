use serde::{Deserialize, Serialize};

/// Lifecycle shared by modules, lessons, evaluations and exercises.
/// Only `Active` content is visible to learners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Draft,
    #[default]
    Active,
    Inactive,
}

impl LifecycleState {
    pub fn is_active(self) -> bool {
        matches!(self, LifecycleState::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Draft => "draft",
            LifecycleState::Active => "active",
            LifecycleState::Inactive => "inactive",
        }
    }
}

/// Module document stored in the "modules" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    #[serde(rename = "_id")]
    pub id: String,
    pub slug: String,
    pub title: String,
    /// Global ordering key used for menus and ranking overviews
    #[serde(default)]
    pub ordering: i32,
    #[serde(default)]
    pub state: LifecycleState,
}

/// Lesson document stored in the "lessons" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(rename = "_id")]
    pub id: String,
    pub module_id: String,
    #[serde(default)]
    pub slug: String,
    pub title: String,
    /// 1-based position inside the module
    pub order: u32,
    #[serde(default)]
    pub state: LifecycleState,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonRef {
    pub id: String,
    pub title: String,
    pub order: u32,
}

impl From<&Lesson> for LessonRef {
    fn from(lesson: &Lesson) -> Self {
        LessonRef {
            id: lesson.id.clone(),
            title: lesson.title.clone(),
            order: lesson.order,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleRef {
    pub id: String,
    pub slug: String,
    pub title: String,
}

impl From<&Module> for ModuleRef {
    fn from(module: &Module) -> Self {
        ModuleRef {
            id: module.id.clone(),
            slug: module.slug.clone(),
            title: module.title.clone(),
        }
    }
}

/// Active lessons of a module sorted by their order index.
pub fn active_in_order(mut lessons: Vec<Lesson>) -> Vec<Lesson> {
    lessons.retain(|lesson| lesson.state.is_active());
    lessons.sort_by_key(|lesson| lesson.order);
    lessons
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(id: &str, order: u32, state: LifecycleState) -> Lesson {
        Lesson {
            id: id.to_string(),
            module_id: "m1".to_string(),
            slug: id.to_string(),
            title: id.to_uppercase(),
            order,
            state,
        }
    }

    #[test]
    fn active_in_order_drops_drafts_and_sorts() {
        let lessons = vec![
            lesson("c", 3, LifecycleState::Active),
            lesson("a", 1, LifecycleState::Active),
            lesson("x", 2, LifecycleState::Draft),
            lesson("b", 2, LifecycleState::Active),
        ];

        let ids: Vec<_> = active_in_order(lessons)
            .into_iter()
            .map(|lesson| lesson.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn state_defaults_to_active_when_missing() {
        let module: Module = serde_json::from_value(serde_json::json!({
            "_id": "m1",
            "slug": "html",
            "title": "Introduction to HTML"
        }))
        .unwrap();
        assert!(module.state.is_active());
        assert_eq!(module.ordering, 0);
    }
}
