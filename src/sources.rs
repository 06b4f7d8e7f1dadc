use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordinal key of a selectable source. The registry uses the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKey(pub u16);

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SourceKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u16>().map(SourceKey)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceEntry {
    pub key: SourceKey,
    pub name: &'static str,
    pub url: &'static str,
}

// Newest first. Each list covers December 1st through November 30th.
static SOURCES: [SourceEntry; 6] = [
    SourceEntry {
        key: SourceKey(2022),
        name: "2022",
        url: "https://gist.githubusercontent.com/simdnyan/2696812b5d4aa4aa4009a3f31fa9dfb7/raw/3e931e8ae85c283f8acb776167bdc68a1f2ae512/20211201-20221130",
    },
    SourceEntry {
        key: SourceKey(2021),
        name: "2021",
        url: "https://gist.githubusercontent.com/simdnyan/fc703dbd3a3805ce537a77cbc7269c06/raw/fca790ba683f6e3003dc4aa78af0291e639f8e97/20201201-20211130",
    },
    SourceEntry {
        key: SourceKey(2020),
        name: "2020",
        url: "https://gist.githubusercontent.com/simdnyan/7ece810139961663819aa3c64448874c/raw/ac6d5ce3a0b2ea2a96f4f6dc2a7d6ec86ae5f4da/20191201-20201130",
    },
    SourceEntry {
        key: SourceKey(2019),
        name: "2019",
        url: "https://gist.githubusercontent.com/simdnyan/a82a49ed5a2d4e559b393f20746a6587/raw/0d02b2d846e2af1748baf4ccd739859310efd2d1/20181201-20191130",
    },
    SourceEntry {
        key: SourceKey(2018),
        name: "2018",
        url: "https://gist.githubusercontent.com/simdnyan/1f9f19c523100ceeadc8f67b017b7ddb/raw/45f69b54ac0201b3c028e7ccc7325c04fc384e45/20171201-20181130",
    },
    SourceEntry {
        key: SourceKey(2017),
        name: "2017",
        url: "https://gist.githubusercontent.com/simdnyan/02fbf4106ad9bd39cf02eb418ced5fa5/raw/4b5cfe9712d0c1ea5a2f81ffd71ffe9d14deb6bd/20161201-20171130",
    },
];

pub fn list() -> &'static [SourceEntry] {
    &SOURCES
}

pub fn find(key: SourceKey) -> Option<&'static SourceEntry> {
    SOURCES.iter().find(|entry| entry.key == key)
}

/// The most recent source; selected on startup unless configured otherwise.
pub fn default_entry() -> &'static SourceEntry {
    &SOURCES[0]
}
