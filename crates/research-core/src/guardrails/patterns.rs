//! Compiled detection patterns for the guardrail gates.
//!
//! Patterns that fail to compile produce no matches instead of panicking
//! (`LazyLock<Option<Regex>>`).

use regex::Regex;
use std::sync::LazyLock;

/// A named detection pattern.
pub struct NamedPattern {
    pub name: &'static str,
    pub regex: &'static LazyLock<Option<Regex>>,
}

impl NamedPattern {
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex
            .as_ref()
            .and_then(|re| re.find(text))
            .map(|m| m.as_str())
    }
}

macro_rules! pattern {
    ($name:ident, $regex_str:expr) => {
        pub static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

// ── Prompt injection / jailbreak ──────────────────────────────────────────
pattern!(
    RE_IGNORE_INSTRUCTIONS,
    r"(?i)\b(ignore|disregard|forget|override)\b.{0,30}\b(previous|prior|above|earlier|all|your)\b.{0,20}\b(instructions|rules|prompts?|directions|guidelines)\b"
);
pattern!(
    RE_ROLE_OVERRIDE,
    r"(?i)\byou are now\b.{0,40}\b(dan|unrestricted|unfiltered|jailbroken|developer mode|evil)\b"
);
pattern!(RE_DAN, r"(?i)\b(do anything now|jailbreak|jail-break)\b");
pattern!(
    RE_PRETEND_UNRESTRICTED,
    r"(?i)\b(pretend|act|behave)\b.{0,30}\b(no|without)\b.{0,20}\b(restrictions|filters|limits|rules|guidelines)\b"
);
pattern!(
    RE_SYSTEM_PROMPT_LEAK,
    r"(?i)\b(reveal|print|show|repeat|output)\b.{0,30}\b(system prompt|hidden instructions|initial prompt)\b"
);
pattern!(RE_FAKE_ROLE_TAG, r"(?i)(<\|im_start\|>|\[/?INST\]|^\s*system\s*:)");

pub static INJECTION_PATTERNS: &[NamedPattern] = &[
    NamedPattern {
        name: "instruction override",
        regex: &RE_IGNORE_INSTRUCTIONS,
    },
    NamedPattern {
        name: "role override",
        regex: &RE_ROLE_OVERRIDE,
    },
    NamedPattern {
        name: "jailbreak keyword",
        regex: &RE_DAN,
    },
    NamedPattern {
        name: "restriction bypass",
        regex: &RE_PRETEND_UNRESTRICTED,
    },
    NamedPattern {
        name: "system prompt extraction",
        regex: &RE_SYSTEM_PROMPT_LEAK,
    },
    NamedPattern {
        name: "chat role tag",
        regex: &RE_FAKE_ROLE_TAG,
    },
];

// ── PII ───────────────────────────────────────────────────────────────────
pattern!(
    RE_EMAIL,
    r"[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}"
);
pattern!(
    RE_PHONE,
    r"(?:^|[\s(])(?:\+\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b"
);
pattern!(RE_SSN, r"\b\d{3}-\d{2}-\d{4}\b");
pattern!(
    RE_CREDIT_CARD,
    r"\b(?:4\d{3}|5[1-5]\d{2}|3[47]\d{2}|6(?:011|5\d{2}))[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{3,4}\b"
);
pattern!(
    RE_IBAN,
    r"\b[A-Z]{2}\d{2}[A-Z0-9]{4}\d{7}(?:[A-Z0-9]?\d{0,16})\b"
);

pub static PII_PATTERNS: &[NamedPattern] = &[
    NamedPattern {
        name: "email address",
        regex: &RE_EMAIL,
    },
    NamedPattern {
        name: "phone number",
        regex: &RE_PHONE,
    },
    NamedPattern {
        name: "social security number",
        regex: &RE_SSN,
    },
    NamedPattern {
        name: "credit card number",
        regex: &RE_CREDIT_CARD,
    },
    NamedPattern {
        name: "IBAN",
        regex: &RE_IBAN,
    },
];

// ── Epistemic uncertainty (hallucination markers) ─────────────────────────
pattern!(
    RE_UNCERTAINTY,
    r"(?i)\b(i think|i believe|i guess|i'm not sure|i am not sure|probably|possibly|it is possible that|it might be|might be|may have been|as far as i know|to my knowledge|if i recall|i assume|presumably|it seems that)\b"
);

// ── Harmful content ───────────────────────────────────────────────────────
pattern!(
    RE_WEAPONS,
    r"(?i)\b(how to|steps to|instructions for)\b.{0,40}\b(build|make|assemble|synthesi[sz]e)\b.{0,30}\b(bomb|explosive|nerve agent|bioweapon|chemical weapon)s?\b"
);
pattern!(
    RE_SELF_HARM,
    r"(?i)\b(you should|go) (kill|hurt) yourself\b|\bbest way to (commit suicide|kill yourself)\b"
);
pattern!(
    RE_VIOLENCE,
    r"(?i)\b(how to|ways to)\b.{0,20}\b(kill|murder|poison)\b.{0,20}\b(someone|a person|people|your)\b"
);
pattern!(
    RE_MALWARE,
    r"(?i)\b(write|create|build)\b.{0,30}\b(ransomware|keylogger|credential stealer)\b"
);

pub static HARMFUL_PATTERNS: &[NamedPattern] = &[
    NamedPattern {
        name: "weapons instructions",
        regex: &RE_WEAPONS,
    },
    NamedPattern {
        name: "self-harm encouragement",
        regex: &RE_SELF_HARM,
    },
    NamedPattern {
        name: "violence instructions",
        regex: &RE_VIOLENCE,
    },
    NamedPattern {
        name: "malware creation",
        regex: &RE_MALWARE,
    },
];

/// All distinct uncertainty phrases found in `text`, lowercased.
pub fn uncertainty_markers(text: &str) -> Vec<String> {
    let Some(re) = RE_UNCERTAINTY.as_ref() else {
        return Vec::new();
    };
    let mut found: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        let phrase = m.as_str().to_lowercase();
        if !found.contains(&phrase) {
            found.push(phrase);
        }
    }
    found
}
