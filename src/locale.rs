//! Locale lookup for every user-facing string the core produces

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ja,
    En,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::Ja, Locale::En];

    pub fn code(&self) -> &'static str {
        match self {
            Locale::Ja => "ja",
            Locale::En => "en",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Locale::Ja => "日本語",
            Locale::En => "English",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Locale::Ja => SYSTEM_PROMPT_JA,
            Locale::En => SYSTEM_PROMPT_EN,
        }
    }

    /// Title a conversation carries until its first message names it
    pub fn placeholder_title(&self) -> &'static str {
        match self {
            Locale::Ja => "新しい会話",
            Locale::En => "New conversation",
        }
    }

    /// Replaces the content of an assistant reply whose stream failed
    pub fn turn_failed_apology(&self) -> &'static str {
        match self {
            Locale::Ja => {
                "申し訳ございませんが、現在応答を生成できません。後でもう一度お試しください。"
            }
            Locale::En => {
                "Sorry, a response could not be generated right now. Please try again later."
            }
        }
    }

    /// Used when the provider finished without producing any text
    pub fn empty_response_fallback(&self) -> &'static str {
        match self {
            Locale::Ja => "申し訳ございませんが、応答を生成できませんでした。",
            Locale::En => "Sorry, no response could be generated.",
        }
    }

    /// Shown when a turn fails before any reply was started
    pub fn send_failed_notice(&self) -> &'static str {
        match self {
            Locale::Ja => "メッセージを送信できませんでした。もう一度お試しください。",
            Locale::En => "The message could not be sent. Please try again.",
        }
    }

    pub(crate) fn quote_labels(&self) -> QuoteLabels {
        match self {
            Locale::Ja => QuoteLabels {
                partial: "部分引用",
                full: "全文引用",
                from_user: "ユーザーのメッセージ",
                from_assistant: "AIの回答",
                header_open: "【",
                header_sep: "：",
                header_suffix: "より】",
                follow_up: "上記の引用について：",
            },
            Locale::En => QuoteLabels {
                partial: "Partial quote",
                full: "Full quote",
                from_user: "the user's message",
                from_assistant: "the AI's answer",
                header_open: "[",
                header_sep: " from ",
                header_suffix: "]",
                follow_up: "Regarding the quote above: ",
            },
        }
    }
}

pub(crate) struct QuoteLabels {
    pub partial: &'static str,
    pub full: &'static str,
    pub from_user: &'static str,
    pub from_assistant: &'static str,
    pub header_open: &'static str,
    pub header_sep: &'static str,
    pub header_suffix: &'static str,
    pub follow_up: &'static str,
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ja" => Ok(Locale::Ja),
            "en" => Ok(Locale::En),
            other => Err(format!("unsupported locale '{}' (expected ja or en)", other)),
        }
    }
}

const SYSTEM_PROMPT_JA: &str = "あなたは親切で知識豊富なAIアシスタントです。日本語で分かりやすく回答してください。

ユーザーが過去のメッセージや特定のテキストを引用して質問した場合は、以下の点に注意して回答してください：

1. 引用された内容を正確に理解し、それに基づいて回答する
2. 引用部分が不明確な場合は、確認を求める
3. 引用内容に対する具体的な説明や関連情報を提供する
4. 引用された文脈を考慮して適切な詳しさで説明する
5. 必要に応じて、引用部分を参照しながら説明する

引用がない通常の質問の場合は、これまで通り親切で分かりやすい回答を心がけてください。";

const SYSTEM_PROMPT_EN: &str = "You are a helpful and knowledgeable AI assistant. Answer clearly in English.

When the user quotes an earlier message or a specific passage, keep the following in mind:

1. Understand the quoted content precisely and base your answer on it
2. Ask for clarification if the quoted part is ambiguous
3. Give concrete explanations and related information about the quote
4. Match the level of detail to the quoted context
5. Refer back to the quoted passage where it helps

For ordinary questions without a quote, simply give a friendly, easy-to-follow answer.";
