use serde::{Deserialize, Serialize};

/// Group roles, declared lowest to highest so the derived `Ord` is the
/// privilege order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Member,
    Secretary,
    Treasurer,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Permission {
    SubmitContribution,
    RecordPayment,
    ReviewContribution,
    ReviewLoan,
    DisburseLoan,
    CloseLoan,
    DefaultLoan,
    ManageMembers,
}

impl Permission {
    /// Lowest role holding this permission.
    pub fn minimum_role(self) -> Role {
        match self {
            Permission::SubmitContribution => Role::Member,
            Permission::ManageMembers => Role::Secretary,
            Permission::RecordPayment
            | Permission::ReviewContribution
            | Permission::ReviewLoan
            | Permission::DisburseLoan
            | Permission::CloseLoan => Role::Treasurer,
            Permission::DefaultLoan => Role::Admin,
        }
    }
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Member => "MEMBER",
            Role::Secretary => "SECRETARY",
            Role::Treasurer => "TREASURER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "MEMBER" => Some(Role::Member),
            "SECRETARY" => Some(Role::Secretary),
            "TREASURER" => Some(Role::Treasurer),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn at_least(self, other: Role) -> bool {
        self >= other
    }

    pub fn can(self, permission: Permission) -> bool {
        self.at_least(permission.minimum_role())
    }
}
