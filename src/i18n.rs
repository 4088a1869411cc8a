use std::env;

use crate::config::{HudConfig, Language};

#[derive(Debug)]
pub struct Translations {
    pub labels: LimitLabels,
    pub time: TimeUnits,
    pub no_context: &'static str,
    pub context_warning: &'static str,
    pub context_critical: &'static str,
    pub all_todos_complete: &'static str,
}

#[derive(Debug)]
pub struct LimitLabels {
    pub five_hour: &'static str,
    pub seven_day: &'static str,
    pub seven_day_sonnet: &'static str,
}

#[derive(Debug)]
pub struct TimeUnits {
    pub short_hours: &'static str,
    pub short_minutes: &'static str,
}

pub static EN: Translations = Translations {
    labels: LimitLabels {
        five_hour: "5h",
        seven_day: "7d",
        seven_day_sonnet: "7d(Sonnet)",
    },
    time: TimeUnits {
        short_hours: "h",
        short_minutes: "m",
    },
    no_context: "No context data",
    context_warning: "Context {pct}% - consider /compact",
    context_critical: "Context {pct}% - /compact recommended!",
    all_todos_complete: "All todos complete",
};

pub static KO: Translations = Translations {
    labels: LimitLabels {
        five_hour: "5시간",
        seven_day: "7일",
        seven_day_sonnet: "7일(소넷만)",
    },
    time: TimeUnits {
        short_hours: "시간",
        short_minutes: "분",
    },
    no_context: "컨텍스트 데이터 없음",
    context_warning: "컨텍스트 {pct}% - /compact 고려",
    context_critical: "컨텍스트 {pct}% - /compact 권장!",
    all_todos_complete: "모든 할 일 완료",
};

pub fn translations(config: &HudConfig) -> &'static Translations {
    match resolve_language(config.language, locale_from_env().as_deref()) {
        Language::Ko => &KO,
        _ => &EN,
    }
}

fn locale_from_env() -> Option<String> {
    ["LANG", "LANGUAGE", "LC_ALL"]
        .into_iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

fn resolve_language(configured: Language, locale: Option<&str>) -> Language {
    match configured {
        Language::Auto => {
            if locale.is_some_and(|value| value.to_ascii_lowercase().starts_with("ko")) {
                Language::Ko
            } else {
                Language::En
            }
        }
        explicit => explicit,
    }
}
