use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed set of consult identities. The three specialists review the raw
/// report; the multidisciplinary team consumes their outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Cardiologist,
    Psychologist,
    Pulmonologist,
    MultidisciplinaryTeam,
}

impl Role {
    pub const SPECIALISTS: [Role; 3] = [Role::Cardiologist, Role::Psychologist, Role::Pulmonologist];

    pub fn is_specialist(self) -> bool {
        !matches!(self, Role::MultidisciplinaryTeam)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Cardiologist => "Cardiologist",
            Role::Psychologist => "Psychologist",
            Role::Pulmonologist => "Pulmonologist",
            Role::MultidisciplinaryTeam => "MultidisciplinaryTeam",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
