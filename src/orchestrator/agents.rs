// What Pedro and Juan say in the chat

use crate::models::{AgentName, Message};

/// Pedro confirms the subject and starts researching
pub fn acknowledgement(subject: &str) -> Message {
    Message::agent(
        AgentName::Pedro,
        format!("Understood. Starting the technical analysis for \"{}\".", subject),
    )
}

/// Pedro reports finding number `number` (1-based)
pub fn finding(number: u32, finding: &str) -> Message {
    Message::agent(AgentName::Pedro, format!("[Finding #{}]: {}", number, finding))
}

/// Juan takes over from Pedro
pub fn hand_off() -> Message {
    Message::agent(
        AgentName::Juan,
        "Thanks Pedro, great technical work. I'll now shape the business strategy for the client.",
    )
}

/// Juan delivers the report
pub fn delivery() -> Message {
    Message::agent(AgentName::Juan, "Here is the final executive report.")
}
