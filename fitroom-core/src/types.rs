use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, ValidationError};
use crate::pricing::CostEvent;

/// Reserved garment id for a session-scoped garment backed by an uploaded photo.
pub const CUSTOM_GARMENT_ID: &str = "-1";

// ── Slots ──────────────────────────────────────────────────────────

/// One of the two garment roles in an outfit. Also the garment's body placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Upper,
    Lower,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Upper, Slot::Lower];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upper => "upper",
            Self::Lower => "lower",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Upper => 0,
            Self::Lower => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ── Images ─────────────────────────────────────────────────────────

/// Raw image bytes with their MIME type.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub mime_type: String,
    #[serde(rename = "data", with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImageData {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Decode a base64 payload as delivered by the oracles.
    pub fn from_base64(data: &str, mime_type: impl Into<String>) -> Result<Self, FetchError> {
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(Self::new(bytes, mime_type))
    }

    /// Decode an embedded `data:<mime>;base64,<payload>` URI in place.
    pub fn from_data_uri(uri: &str) -> Result<Self, FetchError> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| FetchError::Decode("not a data URI".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| FetchError::Decode("data URI has no payload".to_string()))?;
        if !header.ends_with(";base64") {
            return Err(FetchError::Decode(
                "only base64 data URIs are supported".to_string(),
            ));
        }
        let mime = header.trim_end_matches(";base64");
        let mime = if mime.is_empty() { "image/png" } else { mime };
        let image = Self::from_base64(payload, mime)?;
        if image.bytes.is_empty() {
            return Err(FetchError::EmptyBody("data URI".to_string()));
        }
        Ok(image)
    }

    pub fn is_data_uri(value: &str) -> bool {
        value.starts_with("data:")
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Length of the base64 encoding without materializing it.
    pub fn encoded_len(&self) -> usize {
        self.bytes.len().div_ceil(3) * 4
    }

    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BASE64.decode(raw.as_bytes()).map_err(serde::de::Error::custom)
    }
}

// ── Body measurements ──────────────────────────────────────────────

/// Body measurements: inches and pounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub height: f64,
    pub weight: f64,
    pub chest: f64,
    pub waist: f64,
}

impl Measurements {
    /// All four fields must be finite and positive before any recommendation fetch.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("height", self.height),
            ("weight", self.weight),
            ("chest", self.chest),
            ("waist", self.waist),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(ValidationError::IncompleteMeasurements(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn rounded(self) -> Self {
        Self {
            height: self.height.round(),
            weight: self.weight.round(),
            chest: self.chest.round(),
            waist: self.waist.round(),
        }
    }
}

// ── Garments ───────────────────────────────────────────────────────

/// Named body measurements for one size label. Strings allow ranges like "38-40".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeMeasurements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleeve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inseam: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoulder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hip: Option<String>,
}

/// Size label → measurements, in chart order.
pub type SizeChart = IndexMap<String, SizeMeasurements>;

/// A garment as read from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Garment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub brand: String,
    pub body_placement: Slot,
    #[serde(rename = "type")]
    pub garment_type: String,
    pub color: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_image_url: Option<String>,
    #[serde(default)]
    pub size_chart: SizeChart,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Garment {
    /// A session-scoped garment backed by an uploaded photo. It has no size chart.
    pub fn custom(placement: Slot, garment_type: &str, color: &str) -> Self {
        Self {
            id: CUSTOM_GARMENT_ID.to_string(),
            name: format!("Your {garment_type}"),
            brand: String::new(),
            body_placement: placement,
            garment_type: garment_type.to_string(),
            color: color.to_string(),
            image_url: String::new(),
            back_image_url: None,
            side_image_url: None,
            size_chart: SizeChart::new(),
            description: None,
        }
    }

    pub fn is_custom(&self) -> bool {
        self.id == CUSTOM_GARMENT_ID
    }
}

// ── Fit recommendations ────────────────────────────────────────────

/// A size label with its descriptive fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeOption {
    pub size: String,
    pub fit: String,
}

/// Oracle output mapping measurements and a size chart to a best size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitRecommendation {
    pub recommended_size: String,
    pub projected_fit: String,
    pub confidence_score: f64,
    pub alternatives: Vec<SizeOption>,
}

impl FitRecommendation {
    /// Enforce the recommendation contract: a non-empty size, exactly two
    /// alternatives distinct from each other and from the recommended size.
    /// Confidence is clamped into `[0, 1]`.
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        let recommended = self.recommended_size.trim();
        if recommended.is_empty() {
            return Err(ValidationError::InvalidRecommendation(
                "recommended size is empty".to_string(),
            ));
        }
        if self.alternatives.len() != 2 {
            return Err(ValidationError::InvalidRecommendation(format!(
                "expected exactly 2 alternatives, got {}",
                self.alternatives.len()
            )));
        }
        let first = self.alternatives[0].size.trim();
        let second = self.alternatives[1].size.trim();
        if first.is_empty() || second.is_empty() {
            return Err(ValidationError::InvalidRecommendation(
                "alternative size is empty".to_string(),
            ));
        }
        if first == second || first == recommended || second == recommended {
            return Err(ValidationError::InvalidRecommendation(format!(
                "alternatives must be distinct sizes other than {recommended} (got {first}, {second})"
            )));
        }
        if self.confidence_score.is_nan() {
            return Err(ValidationError::InvalidRecommendation(
                "confidence score is not a number".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_score) {
            tracing::warn!(
                confidence = self.confidence_score,
                "Clamping out-of-range confidence score"
            );
            self.confidence_score = self.confidence_score.clamp(0.0, 1.0);
        }
        Ok(self)
    }

    /// The recommended size first, then the two alternatives.
    pub fn size_options(&self) -> Vec<SizeOption> {
        let mut options = vec![SizeOption {
            size: self.recommended_size.clone(),
            fit: self.projected_fit.clone(),
        }];
        options.extend(self.alternatives.iter().cloned());
        options
    }

    /// The chosen size this recommendation seeds a slot with.
    pub fn default_choice(&self) -> SizeChoice {
        SizeChoice::new(&self.recommended_size, &self.projected_fit)
    }
}

/// The size the user wants to preview for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeChoice {
    pub size: String,
    pub fit_label: String,
}

impl SizeChoice {
    pub fn new(size: &str, fit_label: &str) -> Self {
        Self {
            size: size.to_string(),
            fit_label: fit_label.to_string(),
        }
    }
}

// ── Poses ──────────────────────────────────────────────────────────

/// A camera pose with its natural-language description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pose {
    pub name: String,
    pub description: String,
    /// The person faces away from the camera.
    #[serde(default)]
    pub back_view: bool,
}

impl Pose {
    pub fn front() -> Self {
        Self {
            name: "Front".to_string(),
            description: "Full frontal view, standing naturally.".to_string(),
            back_view: false,
        }
    }

    pub fn back() -> Self {
        Self {
            name: "Back".to_string(),
            description: "View from behind, showing the back of the person.".to_string(),
            back_view: true,
        }
    }
}

pub fn default_poses() -> Vec<Pose> {
    vec![Pose::front(), Pose::back()]
}

// ── Results and records ────────────────────────────────────────────

/// Estimated output resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl Resolution {
    /// Estimate from the base64-encoded size of the generated image.
    pub fn estimate(image: &ImageData) -> Self {
        let encoded = image.encoded_len();
        if encoded > 2_000_000 {
            Self::FourK
        } else if encoded > 1_000_000 {
            Self::TwoK
        } else {
            Self::OneK
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

/// A generated preview as held by the cache and shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct TryOnResult {
    pub image: ImageData,
    pub caption: String,
    pub cost: CostEvent,
    pub resolution: Resolution,
}

/// One persisted generation-cost event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub images_in: u32,
    pub images_out: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub cost_usd: f64,
}

/// An outfit the user chose to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedOutfit {
    pub id: String,
    pub generated_image: ImageData,
    pub upper_garment: Option<Garment>,
    pub upper_garment_size: Option<String>,
    pub lower_garment: Option<Garment>,
    pub lower_garment_size: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recommendation(recommended: &str, alts: [&str; 2]) -> FitRecommendation {
        FitRecommendation {
            recommended_size: recommended.to_string(),
            projected_fit: "True to Size".to_string(),
            confidence_score: 0.8,
            alternatives: alts
                .iter()
                .map(|s| SizeOption {
                    size: (*s).to_string(),
                    fit: "Alt".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn data_uri_decodes_in_place() {
        let image = ImageData::from_data_uri("data:image/jpeg;base64,aGVsbG8=").unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.to_data_uri(), "data:image/jpeg;base64,aGVsbG8=");
    }

    #[test]
    fn malformed_data_uri_is_a_decode_error() {
        assert!(ImageData::from_data_uri("data:image/png;base64").is_err());
        assert!(ImageData::from_data_uri("data:image/png,plain").is_err());
        assert!(ImageData::from_data_uri("data:image/png;base64,!!!").is_err());
        assert!(ImageData::from_data_uri("https://example.com/a.png").is_err());
    }

    #[test]
    fn encoded_len_matches_base64() {
        for len in [0usize, 1, 2, 3, 4, 100, 1001] {
            let image = ImageData::new(vec![7u8; len], "image/png");
            assert_eq!(image.encoded_len(), image.to_base64().len());
        }
    }

    #[test]
    fn image_data_serializes_as_base64() {
        let image = ImageData::new(b"png".to_vec(), "image/png");
        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["mimeType"], "image/png");
        assert_eq!(json["data"], "cG5n");
        let back: ImageData = serde_json::from_value(json).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn measurements_require_positive_fields() {
        let ok = Measurements {
            height: 70.0,
            weight: 160.0,
            chest: 40.0,
            waist: 32.0,
        };
        assert!(ok.validate().is_ok());

        let bad = Measurements { chest: 0.0, ..ok };
        assert!(matches!(
            bad.validate(),
            Err(ValidationError::IncompleteMeasurements(msg)) if msg.contains("chest")
        ));
        let nan = Measurements {
            waist: f64::NAN,
            ..ok
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn measurements_round() {
        let m = Measurements {
            height: 69.6,
            weight: 160.4,
            chest: 39.5,
            waist: 31.2,
        }
        .rounded();
        assert!((m.height - 70.0).abs() < f64::EPSILON);
        assert!((m.weight - 160.0).abs() < f64::EPSILON);
        assert!((m.chest - 40.0).abs() < f64::EPSILON);
        assert!((m.waist - 31.0).abs() < f64::EPSILON);
    }

    #[test]
    fn recommendation_alternatives_must_be_distinct() {
        assert!(recommendation("M", ["S", "L"]).validate().is_ok());
        assert!(recommendation("M", ["M", "L"]).validate().is_err());
        assert!(recommendation("M", ["L", "L"]).validate().is_err());
        assert!(recommendation("", ["S", "L"]).validate().is_err());

        let mut three = recommendation("M", ["S", "L"]);
        three.alternatives.push(SizeOption {
            size: "XL".into(),
            fit: "Loose".into(),
        });
        assert!(three.validate().is_err());
    }

    #[test]
    fn recommendation_confidence_is_clamped() {
        let mut rec = recommendation("M", ["S", "L"]);
        rec.confidence_score = 1.7;
        let rec = rec.validate().unwrap();
        assert!((rec.confidence_score - 1.0).abs() < f64::EPSILON);

        let mut rec = recommendation("M", ["S", "L"]);
        rec.confidence_score = f64::NAN;
        assert!(rec.validate().is_err());
    }

    #[test]
    fn size_options_list_recommended_first() {
        let rec = recommendation("32x32", ["30x32", "34x32"]);
        let sizes: Vec<_> = rec.size_options().into_iter().map(|o| o.size).collect();
        assert_eq!(sizes, vec!["32x32", "30x32", "34x32"]);
        assert_eq!(rec.default_choice(), SizeChoice::new("32x32", "True to Size"));
    }

    #[test]
    fn garment_json_uses_catalog_field_names() {
        let raw = r#"{
            "id": "17",
            "name": "Oxford Shirt",
            "brand": "Acme",
            "bodyPlacement": "upper",
            "type": "shirt",
            "color": "white",
            "imageUrl": "https://cdn.example.com/17.png",
            "backImageUrl": "https://cdn.example.com/17-back.png",
            "sizeChart": { "S": { "chest": "34-36" }, "M": { "chest": "38-40" } }
        }"#;
        let garment: Garment = serde_json::from_str(raw).unwrap();
        assert_eq!(garment.body_placement, Slot::Upper);
        assert_eq!(garment.garment_type, "shirt");
        assert_eq!(garment.size_chart.keys().collect::<Vec<_>>(), vec!["S", "M"]);
        assert!(!garment.is_custom());
        assert!(Garment::custom(Slot::Lower, "jeans", "blue").is_custom());
    }

    #[test]
    fn resolution_estimate_thresholds() {
        let small = ImageData::new(vec![0; 1000], "image/png");
        assert_eq!(Resolution::estimate(&small), Resolution::OneK);
        let mid = ImageData::new(vec![0; 900_000], "image/png");
        assert_eq!(Resolution::estimate(&mid), Resolution::TwoK);
        let big = ImageData::new(vec![0; 1_600_000], "image/png");
        assert_eq!(Resolution::estimate(&big), Resolution::FourK);
    }
}
