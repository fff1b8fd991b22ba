use mongodb::bson::{self, doc, oid::ObjectId, DateTime, Document};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use validator::Validate;

use super::{iso, now, truthy};
use crate::{errors::ApiError, middleware::auth::Identity};

pub const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_category")]
    pub category: String,
    pub instructor: ObjectId,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    #[serde(default)]
    pub published: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl Course {
    pub const COLLECTION: &'static str = "courses";

    /// Drafts are only visible to their owner and admins.
    pub fn visible_to(&self, identity: &Identity) -> bool {
        self.published || identity.can_manage(&self.instructor)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub duration_minutes: u32,
}

/// Lesson as sent by a client. An existing `_id` is kept so recorded
/// progress keeps pointing at the same lesson after an edit.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LessonInput {
    #[serde(rename = "_id", alias = "id")]
    pub id: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, message = "Lesson title is required"))]
    pub title: String,
    pub content: Option<String>,
    pub duration_minutes: Option<u32>,
}

impl LessonInput {
    pub fn into_lesson(self) -> Result<Lesson, ApiError> {
        let id = match self.id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => ObjectId::parse_str(raw)
                .map_err(|_| ApiError::validation("Invalid lesson id"))?,
            _ => ObjectId::new(),
        };
        Ok(Lesson {
            id,
            title: self.title.trim().to_string(),
            content: self.content.unwrap_or_default(),
            duration_minutes: self.duration_minutes.unwrap_or(0),
        })
    }
}

pub fn build_lessons(inputs: Vec<LessonInput>) -> Result<Vec<Lesson>, ApiError> {
    inputs
        .into_iter()
        .map(|input| {
            input.validate()?;
            input.into_lesson()
        })
        .collect()
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCourseDto {
    #[serde(default)]
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    pub description: Option<String>,
    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub price: Option<f64>,
    pub category: Option<String>,
    pub lessons: Option<Vec<LessonInput>>,
    #[serde(default)]
    pub published: Value,
}

impl CreateCourseDto {
    pub fn into_course(self, instructor: ObjectId) -> Result<Course, ApiError> {
        self.validate()?;
        let lessons = build_lessons(self.lessons.unwrap_or_default())?;
        let created_at = now();
        Ok(Course {
            id: None,
            title: self.title.trim().to_string(),
            description: self.description.unwrap_or_default(),
            price: self.price.unwrap_or(0.0),
            category: self.category.unwrap_or_else(default_category),
            instructor,
            lessons,
            published: truthy(&self.published),
            created_at,
            updated_at: created_at,
        })
    }
}

/// Distinguishes a key sent as `null` (`Some(None)`) from a missing key (`None`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Whitelisted course fields. A missing key is left untouched; an explicit
/// `null` resets the field to its default, and is rejected for `title`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateCourseDto {
    #[serde(default, deserialize_with = "present")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub price: Option<Option<f64>>,
    #[serde(default, deserialize_with = "present")]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub lessons: Option<Option<Vec<LessonInput>>>,
    #[serde(default, deserialize_with = "present")]
    pub published: Option<Option<Value>>,
}

impl UpdateCourseDto {
    /// Builds the `$set` document. A supplied lesson list replaces the old one.
    pub fn into_set_document(self) -> Result<Document, ApiError> {
        let mut set = doc! { "updatedAt": now() };

        if let Some(title) = self.title {
            let title = title.as_deref().map(str::trim).unwrap_or_default();
            if title.is_empty() {
                return Err(ApiError::validation("Title is required"));
            }
            set.insert("title", title);
        }
        if let Some(description) = self.description {
            set.insert("description", description.unwrap_or_default());
        }
        if let Some(price) = self.price {
            let price = price.unwrap_or(0.0);
            if price < 0.0 {
                return Err(ApiError::validation("Price cannot be negative"));
            }
            set.insert("price", price);
        }
        if let Some(category) = self.category {
            set.insert("category", category.unwrap_or_else(default_category));
        }
        if let Some(lessons) = self.lessons {
            let lessons = build_lessons(lessons.unwrap_or_default())?;
            let lessons = bson::to_bson(&lessons)
                .map_err(|e| ApiError::internal(format!("lesson encoding failed: {}", e)))?;
            set.insert("lessons", lessons);
        }
        if let Some(published) = self.published {
            set.insert("published", published.as_ref().map_or(false, truthy));
        }

        Ok(set)
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LessonView {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub content: String,
    pub duration_minutes: u32,
}

impl From<&Lesson> for LessonView {
    fn from(lesson: &Lesson) -> Self {
        Self {
            id: lesson.id.to_hex(),
            title: lesson.title.clone(),
            content: lesson.content.clone(),
            duration_minutes: lesson.duration_minutes,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct InstructorView {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourseView {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub instructor: InstructorView,
    pub lessons: Vec<LessonView>,
    pub published: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl CourseView {
    /// `instructor_name` is the populated display name, when it was looked up.
    pub fn new(course: &Course, instructor_name: Option<String>) -> Self {
        Self {
            id: course.id.map(|id| id.to_hex()).unwrap_or_default(),
            title: course.title.clone(),
            description: course.description.clone(),
            price: course.price,
            category: course.category.clone(),
            instructor: InstructorView {
                id: course.instructor.to_hex(),
                name: instructor_name,
            },
            lessons: course.lessons.iter().map(LessonView::from).collect(),
            published: course.published,
            created_at: iso(course.created_at),
            updated_at: iso(course.updated_at),
        }
    }
}

impl From<&Course> for CourseView {
    fn from(course: &Course) -> Self {
        CourseView::new(course, None)
    }
}

#[derive(Debug, Deserialize)]
pub struct CourseSearchQuery {
    pub q: Option<String>,
}
