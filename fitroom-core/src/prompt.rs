//! Instruction templates for the oracles.
//!
//! [`build_try_on_request`] is pure: it only shapes images already resolved
//! by the [`resolver`](crate::resolver) and text derived from the selection.
//! The section order of the try-on instruction is fixed:
//!
//! 1. image roles
//! 2. analyze-then-transfer directive
//! 3. back-view pose, or identity preservation followed by the pose
//! 4. per-slot garment instructions with their fit labels
//! 5. output constraints

use std::fmt::Write as _;

use crate::error::ValidationError;
use crate::oracle::GenerationRequest;
use crate::types::{Garment, ImageData, Measurements, Pose, SizeChart, SizeChoice, Slot};

/// Bumped whenever the try-on template text changes.
pub const TEMPLATE_VERSION: &str = "tryon-v2";

/// Version tag of the model-photo template.
pub const MODEL_PHOTO_TEMPLATE_VERSION: &str = "model-photo-v1";

/// One garment slot as seen by the builder.
#[derive(Debug, Clone)]
pub struct SlotInput<'a> {
    pub garment: &'a Garment,
    /// Resolved reference image. `None` means describe by attributes only.
    pub reference: Option<ImageData>,
    pub choice: &'a SizeChoice,
}

const ANALYZE_THEN_TRANSFER: &str = "\
STEP 1 - ANALYZE THE GARMENT IMAGE(S) CAREFULLY:
Before generating, study every detail of each garment reference image:
- The exact color, including its specific shade and hue
- The neckline shape (V-neck, round, collared, etc.)
- The sleeves: length, opacity, pattern
- Embroidery or pattern: what it looks like and exactly where it sits
- Decorative elements such as tassels, beads, borders, or sequins
- Whether the fabric is sheer or solid

STEP 2 - TRANSFER THE GARMENT:
Place this EXACT garment on the person. The garment in the output must match what you observed in Step 1.

STRICT RULES:
- The output garment must be recognizable as THE SAME garment as the reference
- Preserve the EXACT embroidery and pattern placement and design
- Preserve the EXACT sleeve appearance
- Preserve the EXACT neckline shape and decoration
- Preserve ALL decorative elements
- Do NOT simplify, enhance, or reinterpret any detail
- Do NOT change the color temperature or shade
";

const BACK_VIEW_POSE: &str =
    "POSE: Show the person from behind (back to camera). Face not visible.\n";

const IDENTITY_PRESERVATION: &str = "\
CRITICAL - PERSON IDENTITY PRESERVATION:
The person in Image 1 must remain EXACTLY THE SAME in the output. This is an EDITING task, not a recreation.
- FACE: Do NOT regenerate, alter, or stylize the face. Keep the exact facial features, expression, eyes, nose, mouth, skin texture, and complexion from Image 1.
- SKIN: Preserve the exact skin tone and visible skin texture.
- HAIR: Keep the same hairstyle, hair color, and hair placement.
- GLASSES: If glasses are worn, keep them exactly as shown.
- BODY HEIGHT: The person's height must stay EXACTLY the same.
- BODY PROPORTIONS: Keep the same shoulder width, waist-to-hip ratio, limb lengths, and overall body shape.
- BODY POSE: Keep the pose and stance from Image 1 unless the pose below requires a change, and keep the same body structure.
- BACKGROUND: Keep the background from Image 1.

The ONLY change is the clothing. Treat this as a photo edit that masks out the clothes and replaces them, leaving everything else pixel-consistent with Image 1.
";

const OUTPUT_REQUIREMENTS: &str = "\
OUTPUT REQUIREMENTS:
- A single final image. The garment on the person must be the SAME garment as the reference, not a similar or inspired version.
- Clean, solid white or light gray background with no other objects or distractions.
- No watermarks, text, labels, or decorative elements outside the person and clothing.
- Only the person wearing the garments in frame.";

/// Assemble the try-on generation request.
///
/// Images are ordered model photo, upper reference, lower reference; a slot
/// without a reference image contributes no image and is described by its
/// color, type, and description instead.
pub fn build_try_on_request(
    model_image: &ImageData,
    measurements: Option<&Measurements>,
    upper: Option<SlotInput<'_>>,
    lower: Option<SlotInput<'_>>,
    pose: &Pose,
) -> Result<GenerationRequest, ValidationError> {
    if upper.is_none() && lower.is_none() {
        return Err(ValidationError::NoGarmentSelected);
    }

    let mut images = vec![model_image.clone()];
    let mut slots: Vec<(Slot, SlotInput<'_>, Option<usize>)> = Vec::with_capacity(2);
    for (slot, input) in [(Slot::Upper, upper), (Slot::Lower, lower)] {
        let Some(mut input) = input else { continue };
        let index = input.reference.take().map(|image| {
            images.push(image);
            images.len()
        });
        slots.push((slot, input, index));
    }

    let mut text = String::from("TASK: Virtual try-on - Transfer the EXACT garment onto the person.\n\n");

    // (a) image roles
    text.push_str("IMAGES:\n- Image 1: Person to dress\n");
    for (slot, _, index) in &slots {
        if let Some(index) = index {
            writeln!(text, "- Image {index}: {} garment to transfer", title(*slot)).unwrap();
        }
    }
    text.push('\n');

    // (b) analyze, then transfer
    text.push_str(ANALYZE_THEN_TRANSFER);
    text.push('\n');

    // (c) pose branch
    if pose.back_view {
        text.push_str(BACK_VIEW_POSE);
    } else {
        text.push_str(IDENTITY_PRESERVATION);
        text.push('\n');
        writeln!(text, "POSE: {}", pose.description).unwrap();
    }
    text.push('\n');

    // (d) per-slot garments
    if let Some(m) = measurements {
        writeln!(
            text,
            "WEARER: height {} in, weight {} lbs, chest {} in, waist {} in. Use these only to judge how the chosen size drapes; do not reshape the body.",
            m.height, m.weight, m.chest, m.waist
        )
        .unwrap();
    }
    for (slot, input, index) in &slots {
        text.push_str(&garment_line(*slot, input, *index));
        text.push('\n');
    }
    text.push('\n');

    // (e) output constraints
    text.push_str(OUTPUT_REQUIREMENTS);

    Ok(GenerationRequest {
        images,
        instruction: text,
        template_version: TEMPLATE_VERSION,
    })
}

fn title(slot: Slot) -> &'static str {
    match slot {
        Slot::Upper => "Upper",
        Slot::Lower => "Lower",
    }
}

fn garment_line(slot: Slot, input: &SlotInput<'_>, index: Option<usize>) -> String {
    let label = title(slot).to_uppercase();
    let choice = input.choice;
    match index {
        Some(index) => format!(
            "{label} GARMENT: Copy EXACTLY from Image {index}. Size {}. Fit to body as: {}",
            choice.size, choice.fit_label
        ),
        None => {
            let garment = input.garment;
            let mut line = format!(
                "{label} GARMENT: Create {} {}.",
                garment.color, garment.garment_type
            );
            if let Some(description) = garment.description.as_deref().filter(|d| !d.trim().is_empty()) {
                write!(line, " Details: {}.", description.trim()).unwrap();
            }
            write!(line, " Size {}. Fit: {}", choice.size, choice.fit_label).unwrap();
            line
        }
    }
}

// ── Model photo ─────────────────────────────────────────────────────

const MODEL_PHOTO_INSTRUCTION: &str = "\
You are an expert photo editor preparing assets for a virtual try-on application. Process the provided image.

PRIMARY GOAL: Isolate the person and place them in a neutral pose on a clean background while perfectly preserving their identity.

CRITICAL INSTRUCTIONS:
1. PRESERVE IDENTITY: The face, facial features, hair, skin tone, and body shape MUST stay IDENTICAL to the original photo. Do not alter or stylize the person in any way.
2. STANDARDIZE POSE: Adjust the pose to a standard, neutral, standing A-pose, as for a fashion model ready for a virtual fitting.
3. CLEAN BACKGROUND: Replace the background entirely with a solid, neutral light gray studio background (#f0f0f0).
4. OUTPUT IMAGE ONLY: Return only the edited image, with no text, borders, or watermarks.";

/// Request that turns an uploaded photo into a clean model photo.
pub fn build_model_photo_request(photo: &ImageData) -> GenerationRequest {
    GenerationRequest {
        images: vec![photo.clone()],
        instruction: MODEL_PHOTO_INSTRUCTION.to_string(),
        template_version: MODEL_PHOTO_TEMPLATE_VERSION,
    }
}

// ── Text oracles ────────────────────────────────────────────────────

/// Instruction for the measurement-estimation oracle.
pub const MEASUREMENT_INSTRUCTION: &str = "\
You are an expert in anthropometry. Estimate body measurements from a single full-body photograph for a virtual try-on application.

Base your estimates on the person's proportions, visible context, and common human biometrics.
- All values must be plausible for a human.
- If height is not obvious, infer it from environmental cues or standard proportions, then estimate weight from height and body shape.
- Respond with a single JSON object and nothing else.

Fields: height (total height, inches), weight (pounds), chest (circumference at the fullest part, inches), waist (circumference at the narrowest part of the torso, inches).";

/// Instruction for the fit-recommendation oracle.
pub fn fit_instruction(measurements: &Measurements, chart: &SizeChart) -> String {
    let chart_json = serde_json::to_string_pretty(chart).unwrap_or_else(|_| "{}".to_string());
    format!(
        "You are an expert virtual stylist. Recommend the best size for an online shopper; a good recommendation reduces returns.

User's body measurements:
- Height: {height} inches
- Weight: {weight} lbs
- Chest: {chest} inches
- Waist: {waist} inches

Garment size chart (inches). Values may be single numbers or ranges such as \"38-40\". Prioritize the measurements most relevant to the garment type.
{chart_json}

Respond with a single JSON object:
- recommendedSize: the single best size label from the chart
- projectedFit: a short description of how that size will fit, e.g. \"True to Size\"
- confidenceScore: a number from 0.0 to 1.0
- alternatives: exactly two OTHER sizes from the chart, each with size and fit. Prefer one smaller and one larger; at the ends of the chart use the two nearest sizes.",
        height = measurements.height,
        weight = measurements.weight,
        chest = measurements.chest,
        waist = measurements.waist,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn garment(id: &str, placement: Slot, description: Option<&str>) -> Garment {
        let mut g = Garment::custom(placement, if placement == Slot::Upper { "blouse" } else { "jeans" }, "navy");
        g.id = id.to_string();
        g.description = description.map(str::to_string);
        g
    }

    fn photo() -> ImageData {
        ImageData::new(b"model".to_vec(), "image/jpeg")
    }

    fn reference(tag: &str) -> Option<ImageData> {
        Some(ImageData::new(tag.as_bytes().to_vec(), "image/png"))
    }

    fn position(haystack: &str, needle: &str) -> usize {
        haystack
            .find(needle)
            .unwrap_or_else(|| panic!("missing section {needle:?}"))
    }

    #[test]
    fn no_slot_is_rejected() {
        let err = build_try_on_request(&photo(), None, None, None, &Pose::front()).unwrap_err();
        assert_eq!(err, ValidationError::NoGarmentSelected);
    }

    #[test]
    fn images_follow_model_upper_lower_order() {
        let upper = garment("1", Slot::Upper, None);
        let lower = garment("2", Slot::Lower, None);
        let m = SizeChoice::new("M", "True to Size");
        let w = SizeChoice::new("32", "Relaxed");
        let request = build_try_on_request(
            &photo(),
            None,
            Some(SlotInput { garment: &upper, reference: reference("upper"), choice: &m }),
            Some(SlotInput { garment: &lower, reference: reference("lower"), choice: &w }),
            &Pose::front(),
        )
        .unwrap();

        let tags: Vec<_> = request.images.iter().map(|i| i.bytes.as_slice()).collect();
        assert_eq!(tags, vec![b"model".as_slice(), b"upper", b"lower"]);
        assert_eq!(request.template_version, TEMPLATE_VERSION);
        assert!(request.instruction.contains("- Image 2: Upper garment to transfer"));
        assert!(request.instruction.contains("- Image 3: Lower garment to transfer"));
        assert!(request.instruction.contains(
            "UPPER GARMENT: Copy EXACTLY from Image 2. Size M. Fit to body as: True to Size"
        ));
        assert!(request.instruction.contains(
            "LOWER GARMENT: Copy EXACTLY from Image 3. Size 32. Fit to body as: Relaxed"
        ));
    }

    #[test]
    fn lower_reference_takes_image_two_when_upper_has_none() {
        let upper = garment("1", Slot::Upper, Some("linen, short sleeves"));
        let lower = garment("2", Slot::Lower, None);
        let m = SizeChoice::new("M", "Slim Fit");
        let request = build_try_on_request(
            &photo(),
            None,
            Some(SlotInput { garment: &upper, reference: None, choice: &m }),
            Some(SlotInput { garment: &lower, reference: reference("lower"), choice: &m }),
            &Pose::front(),
        )
        .unwrap();

        assert_eq!(request.image_count(), 2);
        let roles: Vec<_> = request
            .instruction
            .lines()
            .filter(|l| l.starts_with("- Image "))
            .collect();
        insta::assert_snapshot!(roles.join(" | "), @"- Image 1: Person to dress | - Image 2: Lower garment to transfer");
        assert!(request.instruction.contains(
            "UPPER GARMENT: Create navy blouse. Details: linen, short sleeves. Size M. Fit: Slim Fit"
        ));
    }

    #[test]
    fn front_view_sections_are_ordered() {
        let upper = garment("1", Slot::Upper, None);
        let m = SizeChoice::new("M", "True to Size");
        let measurements = Measurements { height: 70.0, weight: 160.0, chest: 40.0, waist: 32.0 };
        let request = build_try_on_request(
            &photo(),
            Some(&measurements),
            Some(SlotInput { garment: &upper, reference: reference("upper"), choice: &m }),
            None,
            &Pose::front(),
        )
        .unwrap();
        let text = &request.instruction;

        let order = [
            position(text, "IMAGES:"),
            position(text, "STEP 1 - ANALYZE"),
            position(text, "STEP 2 - TRANSFER"),
            position(text, "PERSON IDENTITY PRESERVATION"),
            position(text, "POSE: Full frontal view, standing naturally."),
            position(text, "WEARER: height 70 in"),
            position(text, "UPPER GARMENT:"),
            position(text, "OUTPUT REQUIREMENTS:"),
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]), "sections out of order: {order:?}");
        assert!(!text.contains("LOWER GARMENT"));
        assert!(!text.contains("Face not visible"));
    }

    #[test]
    fn back_view_drops_identity_constraints() {
        let lower = garment("2", Slot::Lower, None);
        let w = SizeChoice::new("32", "Relaxed");
        let request = build_try_on_request(
            &photo(),
            None,
            None,
            Some(SlotInput { garment: &lower, reference: None, choice: &w }),
            &Pose::back(),
        )
        .unwrap();
        let text = &request.instruction;

        assert!(text.contains("POSE: Show the person from behind (back to camera). Face not visible."));
        assert!(!text.contains("IDENTITY PRESERVATION"));
        assert!(position(text, "STRICT RULES:") < position(text, "POSE: Show the person"));
        assert!(position(text, "POSE: Show the person") < position(text, "LOWER GARMENT: Create navy jeans."));
        assert_eq!(request.image_count(), 1);
    }

    #[test]
    fn builder_is_deterministic() {
        let upper = garment("1", Slot::Upper, None);
        let m = SizeChoice::new("M", "True to Size");
        let build = || {
            build_try_on_request(
                &photo(),
                None,
                Some(SlotInput { garment: &upper, reference: reference("u"), choice: &m }),
                None,
                &Pose::front(),
            )
            .unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn fit_instruction_embeds_measurements_and_chart() {
        let mut chart = SizeChart::new();
        chart.insert(
            "M".into(),
            crate::types::SizeMeasurements { chest: Some("38-40".into()), ..Default::default() },
        );
        let text = fit_instruction(
            &Measurements { height: 70.0, weight: 160.0, chest: 39.0, waist: 32.0 },
            &chart,
        );
        assert!(text.contains("- Chest: 39 inches"));
        assert!(text.contains("\"38-40\""));
        assert!(text.contains("exactly two OTHER sizes"));
    }

    #[test]
    fn model_photo_request_carries_one_image() {
        let request = build_model_photo_request(&photo());
        assert_eq!(request.image_count(), 1);
        assert!(request.instruction.contains("#f0f0f0"));
        assert_eq!(request.template_version, MODEL_PHOTO_TEMPLATE_VERSION);
    }
}
