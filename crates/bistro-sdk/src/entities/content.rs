//! 顾客端展示内容：公告、活动、评价、标语、每周特价

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{default_true, Entity, EntityKind};
use crate::backend::OrderBy;
use crate::error::{BistroSDKError, Result};

/// 公告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAnnouncement {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
}

impl Entity for Announcement {
    const KIND: EntityKind = EntityKind::Announcement;
    type Draft = NewAnnouncement;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn validate_draft(draft: &NewAnnouncement) -> Result<()> {
        require_text("公告标题", &draft.title)
    }
}

/// 活动
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub event_date: NaiveDate,
    /// 展示用时间文本，如 "7:00 PM"
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub event_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
}

impl Entity for Event {
    const KIND: EntityKind = EntityKind::Event;
    type Draft = NewEvent;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn ordering() -> Vec<OrderBy> {
        vec![OrderBy::asc("display_order"), OrderBy::asc("event_date")]
    }

    fn validate_draft(draft: &NewEvent) -> Result<()> {
        require_text("活动标题", &draft.title)?;
        require_price(draft.price)
    }
}

/// 顾客评价
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub customer_name: String,
    pub rating: i16,
    #[serde(default)]
    pub comment: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    pub customer_name: String,
    pub rating: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
}

impl Entity for Review {
    const KIND: EntityKind = EntityKind::Review;
    type Draft = NewReview;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn validate_draft(draft: &NewReview) -> Result<()> {
        require_text("顾客名", &draft.customer_name)?;
        if !(1..=5).contains(&draft.rating) {
            return Err(BistroSDKError::InvalidInput(format!(
                "评分必须在 1-5 之间: {}",
                draft.rating
            )));
        }
        Ok(())
    }
}

/// 首页标语
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagline {
    pub id: Uuid,
    pub text: String,
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTagline {
    pub text: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
}

impl Entity for Tagline {
    const KIND: EntityKind = EntityKind::Tagline;
    type Draft = NewTagline;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn validate_draft(draft: &NewTagline) -> Result<()> {
        require_text("标语", &draft.text)
    }
}

/// 每周特价
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySpecial {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    /// 如 "Tuesday"；为空表示整周有效
    #[serde(default)]
    pub day_of_week: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWeeklySpecial {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
}

impl Entity for WeeklySpecial {
    const KIND: EntityKind = EntityKind::WeeklySpecial;
    type Draft = NewWeeklySpecial;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn validate_draft(draft: &NewWeeklySpecial) -> Result<()> {
        require_text("特价标题", &draft.title)?;
        require_price(draft.price)
    }
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BistroSDKError::InvalidInput(format!("{}不能为空", field)));
    }
    Ok(())
}

fn require_price(price: Option<f64>) -> Result<()> {
    match price {
        Some(p) if !p.is_finite() || p < 0.0 => Err(BistroSDKError::InvalidInput(format!("价格无效: {}", p))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn review_rating_must_be_one_to_five() {
        let mut draft = NewReview {
            customer_name: "Ana".to_string(),
            rating: 6,
            comment: None,
            is_active: true,
            display_order: 0,
        };
        assert!(Review::validate_draft(&draft).is_err());
        draft.rating = 5;
        assert!(Review::validate_draft(&draft).is_ok());
    }

    #[test]
    fn event_decodes_backend_row() {
        let row = json!({
            "id": "5d6f3c3e-8e0e-4a8e-9d7e-3a0a1d6f0a11",
            "title": "Wine tasting",
            "description": null,
            "event_date": "2024-07-12",
            "event_time": "7:00 PM",
            "price": 35.0,
            "image_url": null,
            "is_active": true,
            "display_order": 2,
            "created_at": "2024-06-01T10:00:00.123456+00:00",
            "updated_at": "2024-06-01T10:00:00.123456+00:00"
        });
        let event: Event = serde_json::from_value(row).unwrap();
        assert_eq!(event.event_date, NaiveDate::from_ymd_opt(2024, 7, 12).unwrap());
        assert_eq!(event.price, Some(35.0));
        assert_eq!(Event::ordering()[1], OrderBy::asc("event_date"));
    }

    #[test]
    fn negative_price_is_rejected() {
        let draft = NewWeeklySpecial {
            title: "Taco Tuesday".to_string(),
            description: None,
            price: Some(-1.0),
            day_of_week: Some("Tuesday".to_string()),
            image_url: None,
            is_active: true,
            display_order: 0,
        };
        assert!(WeeklySpecial::validate_draft(&draft).is_err());
    }
}
