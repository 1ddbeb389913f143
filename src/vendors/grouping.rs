//! Vendors list agenda items as clips next to the clip of the whole
//! meeting. Only titles tell them apart.

use tracing::warn;

/// Title patterns of the clips holding a whole meeting
#[derive(Debug, Clone, Copy)]
pub struct RootRules {
    /// Whole lowercase titles
    exact: &'static [&'static str],
    /// Lowercase prefixes, also matched as `<keyword>meeting` anywhere
    keywords: &'static [&'static str],
}

/// Shared by most backends
pub const COMMON_ROOTS: RootRules = RootRules {
    exact: &["webcast unavailable", "archive unavailable", "inaugural council meeting"],
    keywords: &[
        "regular council - ",
        "regular council ",
        "complete council ",
        "entire council ",
        "inaugural council ",
        "edited entire",
        "whole ",
        "entire ",
        "full ",
        "special council ",
    ],
};

/// InsInc names agenda items "Regular Council ..." so they cannot mark a meeting
pub const INSINC_ROOTS: RootRules = RootRules {
    exact: &[
        "webcast unavailable",
        "archive unavailable",
        "inaugural council meeting",
        "public hearing",
    ],
    keywords: &["edited entire", "whole ", "entire ", "full ", "special council "],
};

impl RootRules {
    pub fn is_root(&self, title: &str) -> bool {
        self.is_root_or_starts_with(title, None)
    }

    /// Also accept titles starting with `extra_prefix` (lowercase)
    pub fn is_root_or_starts_with(&self, title: &str, extra_prefix: Option<&str>) -> bool {
        let title = title.to_lowercase();
        if extra_prefix.is_some_and(|prefix| title.starts_with(prefix)) {
            return true;
        }
        if self.exact.contains(&title.as_str()) {
            return true;
        }

        for keyword in self.keywords {
            if title.starts_with(keyword) || title.contains(&format!("{keyword}meeting")) {
                // Minutes are documents, unless it is an audio recording of them
                let minutes = title.contains("minutes")
                    && !title.contains("audio")
                    && !title.contains("sound");
                return !minutes;
            }
        }
        false
    }
}

pub trait Titled {
    fn title(&self) -> &str;
}

/// One meeting: the clip covering it and its agenda items
#[derive(Debug, Clone, PartialEq)]
pub struct Group<T> {
    pub root: T,
    pub subclips: Vec<T>,
}

/// Split chronologically ordered clips into meetings.
///
/// A clip before any root clip opens a meeting of its own.
pub fn group_root_and_subclips<T: Titled>(clips: Vec<T>, rules: &RootRules) -> Vec<Group<T>> {
    let mut groups: Vec<Group<T>> = vec![];
    for clip in clips {
        if rules.is_root(clip.title()) {
            groups.push(Group {
                root: clip,
                subclips: vec![],
            });
            continue;
        }

        match groups.last_mut() {
            Some(group) => group.subclips.push(clip),
            None => {
                if !is_continuation(clip.title()) {
                    warn!("Clip '{}' is not part of any meeting, keeping it alone", clip.title());
                }
                groups.push(Group {
                    root: clip,
                    subclips: vec![],
                });
            }
        }
    }
    groups
}

/// Titles of clips resuming a session recorded in an earlier stream
fn is_continuation(title: &str) -> bool {
    title.ends_with("session)")
        || title.starts_with("Opening Remarks")
        || title.contains("Call to Order")
}
