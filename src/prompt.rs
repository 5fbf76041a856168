//! Prompt text and response schema for contact labeling.
//!
//! The instructions anchor the model on the center frame of the strip by
//! its 1-indexed ordinal, so the same wording works for every strip size.
//! The response format is a strict JSON schema, which lets the reconciler
//! parse any conforming answer mechanically.

use serde_json::{Value, json};

use crate::strip::center_ordinal;

/// Name of the JSON schema declared in every request.
pub const SCHEMA_NAME: &str = "contact_annotation";

/// The five fields every label must carry, in schema order.
pub const LABEL_FIELDS: [&str; 5] = [
    "left_hand_contact",
    "right_hand_contact",
    "contact_object",
    "confidence",
    "reason",
];

/// System message for a strip of `strip_size` frames.
pub fn system_message(strip_size: usize, robot_description: &str) -> String {
    format!(
        "You are a robot manipulation expert and computer vision analyst.\n\
         You will be shown a strip of {strip_size} consecutive frames (left → right, chronological order)\n\
         from a third-person (external) camera recording a robot performing a pick-and-place task.\n\
         {robot_description}\n\
         \n\
         Your job is to determine whether the robot's hands are in physical contact\n\
         with any object at the moment captured in the **center frame** of the strip.\n\
         Use the surrounding frames only as temporal context to resolve ambiguity.\n\
         \n\
         Return ONLY a JSON object, with no extra text and no markdown fences."
    )
}

/// User message for `task`, naming the center frame by its ordinal.
pub fn user_message(task: &str, strip_size: usize) -> String {
    let center = center_ordinal(strip_size);
    format!(
        "Task the robot is performing: {task}\n\
         \n\
         The image contains {strip_size} consecutive frames arranged left-to-right.\n\
         Focus your answer on the **center (frame {center})** of the strip.\n\
         \n\
         Analyze the strip and answer the following questions about frame {center}:\n\
         \n\
         1. Is the robot's **left hand** currently touching / grasping / holding any object?\n\
         2. Is the robot's **right hand** currently touching / grasping / holding any object?\n\
         3. If any hand is in contact, what object is being touched?\n\
         \n\
         Reply with this exact JSON schema:\n\
         {{\n\
         \x20 \"left_hand_contact\":  <true | false | null>,\n\
         \x20 \"right_hand_contact\": <true | false | null>,\n\
         \x20 \"contact_object\":     \"<object name, or null if neither hand is in contact>\",\n\
         \x20 \"confidence\":         \"<high | medium | low>\",\n\
         \x20 \"reason\":             \"<one short sentence explaining your decision>\"\n\
         }}\n\
         \n\
         Rules:\n\
         - Use `null` for a hand if it is not visible in frame {center}.\n\
         - `confidence` reflects how certain you are given image clarity and occlusion.\n\
         - Keep `reason` under 30 words."
    )
}

/// The strict `response_format` object sent with every request.
pub fn response_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": SCHEMA_NAME,
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "left_hand_contact": {"type": ["boolean", "null"]},
                    "right_hand_contact": {"type": ["boolean", "null"]},
                    "contact_object": {"type": ["string", "null"]},
                    "confidence": {"type": "string", "enum": ["high", "medium", "low"]},
                    "reason": {"type": "string"},
                },
                "required": LABEL_FIELDS,
                "additionalProperties": false,
            },
        },
    })
}
