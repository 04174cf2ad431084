use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Security,
    Performance,
    Cost,
    Resilience,
    Monitoring,
    Compliance,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Security,
        Category::Performance,
        Category::Cost,
        Category::Resilience,
        Category::Monitoring,
        Category::Compliance,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Security => "SECURITY",
            Category::Performance => "PERFORMANCE",
            Category::Cost => "COST",
            Category::Resilience => "RESILIENCE",
            Category::Monitoring => "MONITORING",
            Category::Compliance => "COMPLIANCE",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
