use serde::{Deserialize, Serialize};

/// User role — selects persona, knowledge collection, and tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    PatientDental,
    PatientDiabetes,
    DoctorDental,
    DoctorEndocrine,
}

impl Role {
    /// Knowledge-base collection backing this role.
    pub fn collection(&self) -> &'static str {
        match self {
            Role::PatientDiabetes => "bndtd",
            Role::DoctorEndocrine => "bsnt",
            Role::PatientDental => "bnrhm",
            Role::DoctorDental => "bsrhm",
        }
    }

    /// Display name shown to the model when describing the user.
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::PatientDental => "Bệnh nhân nha khoa",
            Role::PatientDiabetes => "Bệnh nhân đái tháo đường",
            Role::DoctorDental => "Bác sĩ nha khoa",
            Role::DoctorEndocrine => "Bác sĩ nội tiết",
        }
    }

    /// The audience the composed answer addresses.
    pub fn audience(&self) -> &'static str {
        match self {
            Role::PatientDental => "bệnh nhân nha khoa",
            Role::PatientDiabetes => "bệnh nhân đái tháo đường",
            Role::DoctorDental => "bác sĩ nha khoa",
            Role::DoctorEndocrine => "bác sĩ nội tiết",
        }
    }

    /// Tone instruction for the composing model.
    pub fn tone(&self) -> &'static str {
        match self {
            Role::PatientDental | Role::PatientDiabetes => {
                "thân thiện, ngôn ngữ giản dị, không dùng từ chuyên môn"
            }
            Role::DoctorDental => {
                "thân thiện, ngắn gọn, từ ngữ phù hợp để bác sĩ nha khoa hiểu về nội tiết"
            }
            Role::DoctorEndocrine => {
                "thân thiện, ngắn gọn, từ ngữ phù hợp để bác sĩ nội tiết hiểu về nha khoa"
            }
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient_dental" => Ok(Role::PatientDental),
            "patient_diabetes" => Ok(Role::PatientDiabetes),
            "doctor_dental" => Ok(Role::DoctorDental),
            "doctor_endocrine" => Ok(Role::DoctorEndocrine),
            other => Err(crate::error::FlowError::Config(format!(
                "unknown role: {other}"
            ))),
        }
    }
}

/// Who spoke a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// One prior turn of the conversation, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
        }
    }
}

/// A scored retrieval candidate: identifier, display text, similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub question: String,
    pub score: f32,
}

/// A full knowledge-base entry fetched by identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbEntry {
    pub id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
}

/// Identifier of one stored user memory.
pub type MemoryId = String;

/// One user memory with its relevance score for the current query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryId,
    pub content: String,
    #[serde(default)]
    pub score: f32,
}

/// The user-visible result of a consultation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Answer {
    pub explanation: String,
    #[serde(default)]
    pub followups: Vec<String>,
}

impl Answer {
    pub fn plain(explanation: impl Into<String>) -> Self {
        Self {
            explanation: explanation.into(),
            followups: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        let role: Role = "patient_dental".parse().unwrap();
        assert_eq!(role, Role::PatientDental);
        assert_eq!(role.collection(), "bnrhm");
        assert!("astronaut".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde_snake_case() {
        let json = serde_json::to_string(&Role::DoctorEndocrine).unwrap();
        assert_eq!(json, "\"doctor_endocrine\"");
    }
}
