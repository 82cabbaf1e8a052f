//! Prompt templates for grid triage and composite scoring

use crate::grid::coordinate::row_label;
use crate::models::Criteria;

fn criteria_instruction(criteria: &Criteria) -> String {
    match criteria {
        Criteria::Standout => "Pick the photos that stand out: a strong subject, striking \
             composition, compelling light or a genuine moment."
            .to_string(),
        Criteria::Quality => "Pick the photos with the best technical quality: sharp focus \
             on the subject, correct exposure, no motion blur and no distracting noise."
            .to_string(),
        Criteria::Custom(description) => {
            format!("Pick the photos that best match this description: {}.", description.trim())
        }
    }
}

fn layout_description(dimension: u32) -> String {
    let last_row = row_label(dimension.saturating_sub(1));
    format!(
        "Each cell is labeled in its top-left corner with a coordinate: rows are letters A to {}, \
         columns are numbers 1 to {}. Empty cells have no label.",
        last_row, dimension
    )
}

const ANSWER_FORMAT: &str = "Answer with the coordinates of every photo you pick, separated by \
     commas (for example: A1, B7, C12). If no photo qualifies, answer with the single word NONE.";

/// First-pass prompt: be generous, many thumbnails per grid
pub fn coarse_prompt(criteria: &Criteria, dimension: u32) -> String {
    format!(
        "This image is a {d}x{d} grid of small photo thumbnails. {layout}\n\n\
         {instruction} This is a first screening, so include every photo that might qualify.\n\n\
         {format}",
        d = dimension,
        layout = layout_description(dimension),
        instruction = criteria_instruction(criteria),
        format = ANSWER_FORMAT,
    )
}

/// Second-pass prompt: larger cells, stricter selection
pub fn fine_prompt(criteria: &Criteria, dimension: u32) -> String {
    format!(
        "This image is a {d}x{d} grid of shortlisted photos shown at a larger size. {layout}\n\n\
         {instruction} Be selective: only pick the photos that are clearly among the very best.\n\n\
         {format}",
        d = dimension,
        layout = layout_description(dimension),
        instruction = criteria_instruction(criteria),
        format = ANSWER_FORMAT,
    )
}

/// Per-image scoring prompt; the answer is a JSON object
pub const SCORING_PROMPT: &str = "Rate this photograph. Respond with a single JSON object and \
     nothing else, using this shape:\n\
     {\"aesthetic_score\": <0-10>, \"technical_score\": <0-10>, \
     \"attributes\": {\"subject\": \"...\", \"lighting\": \"...\", \"composition\": \"...\"}, \
     \"explanation\": \"<one or two sentences>\"}\n\
     aesthetic_score rates composition, subject and mood. technical_score rates focus, exposure \
     and noise.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coarse_prompt_describes_grid_range() {
        let prompt = coarse_prompt(&Criteria::Standout, 20);
        assert!(prompt.contains("20x20"));
        assert!(prompt.contains("letters A to T"));
        assert!(prompt.contains("NONE"));
    }

    #[test]
    fn test_custom_criteria_is_interpolated() {
        let prompt = fine_prompt(&Criteria::Custom("kids at the beach".to_string()), 4);
        assert!(prompt.contains("kids at the beach"));
        assert!(prompt.contains("letters A to D"));
    }

    #[test]
    fn test_passes_use_distinct_prompts() {
        assert_ne!(
            coarse_prompt(&Criteria::Quality, 4),
            fine_prompt(&Criteria::Quality, 4)
        );
    }
}
