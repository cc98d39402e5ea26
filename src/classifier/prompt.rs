use crate::db::models::{CategorySet, SensorReading};

const INSTRUCTIONS: &str = "\
You analyse a private room and classify what its occupant is doing. Using the \
attached camera image and the sensor data below, choose the single most likely \
category from the allowed list.

# Categories
- PC_WORK: sitting at the desk PC and working.
- GAMING: sitting at the desk PC and playing a game.
- SLEEPING: lying in the bed.
- USING_SMARTPHONE: in bed or on a chair, upright, using a phone.
- AWAY: nobody is in the room.
- OTHER: none of the above, or it cannot be determined.

# Rules
1. If no person is clearly visible, answer AWAY and ignore every other rule.
2. If the person sits in the desk chair, look at the top of the air conditioner. \
A game controller resting there means it is not in use: answer PC_WORK. If the \
controller is not there, answer GAMING.
3. If the person lies down in the bed, answer SLEEPING. A dark room (low \
illuminance) makes this very likely.
4. If the person is on the bed but upright rather than lying down, answer \
USING_SMARTPHONE. Consider this whenever the person is away from the desk.
5. Anything else is OTHER.";

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.1}"),
        None => "unknown".to_string(),
    }
}

/// Builds the instruction text for one observation. Only the sensor values
/// vary between calls.
pub fn build_prompt(categories: &CategorySet, reading: &SensorReading) -> String {
    format!(
        "{INSTRUCTIONS}\n\n\
         # Sensor data\n\
         - temperature: {} °C\n\
         - humidity: {} %\n\
         - illuminance: {} lux\n\n\
         # Output\n\
         Reply with JSON only, no other text, in exactly this shape:\n\
         {{\"status\": \"<category>\"}}\n\
         where <category> is one of: {}",
        format_value(reading.temperature),
        format_value(reading.humidity),
        format_value(reading.illuminance),
        categories.members().join(", "),
    )
}
