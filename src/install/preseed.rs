// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! debconf preseed answers for the package's configuration prompts.
//!
//! Rendered in `debconf-set-selections` format, one answer per line:
//!
//! ```text
//! <owner> <owner>/<question> <type> <value>
//! ```

use crate::types::SessionParameters;

/// Every question the package's `config` script can ask, with its type.
pub const PACKAGE_QUESTIONS: &[(&str, &str)] = &[
    ("email", "string"),
    ("license-key", "password"),
    ("usage-reporting", "boolean"),
    ("install-mode", "select"),
    ("memory-limit", "string"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreseedAnswer {
    pub question: String,
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preseed {
    package: String,
    answers: Vec<PreseedAnswer>,
}

impl Preseed {
    /// Answer every entry of [`PACKAGE_QUESTIONS`] from the session.
    pub fn from_params(package: &str, params: &SessionParameters) -> Self {
        let answers = PACKAGE_QUESTIONS
            .iter()
            .map(|(question, kind)| {
                let value = match *question {
                    "email" => params.email.clone(),
                    "license-key" => params.license_key.clone(),
                    "usage-reporting" => params.usage_reporting.to_string(),
                    "install-mode" => params.mode.to_string(),
                    "memory-limit" => params.memory.to_string(),
                    _ => String::new(),
                };
                PreseedAnswer {
                    question: format!("{}/{}", package, question),
                    kind,
                    value: single_line(&value),
                }
            })
            .collect();

        Self {
            package: package.to_string(),
            answers,
        }
    }

    /// Questions from `questions` that this preseed leaves unanswered.
    pub fn outstanding<'q>(&self, questions: &[&'q str]) -> Vec<&'q str> {
        questions
            .iter()
            .copied()
            .filter(|q| !self.answers.iter().any(|a| a.question == *q))
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for answer in &self.answers {
            out.push_str(&format!(
                "{} {} {} {}\n",
                self.package, answer.question, answer.kind, answer.value
            ));
        }
        out
    }

    /// Rendered selections with the license key masked, for logging.
    pub fn render_masked(&self) -> String {
        let mut out = String::new();
        for answer in &self.answers {
            let value = if answer.kind == "password" {
                crate::utils::mask_sensitive(&answer.value, 4)
            } else {
                answer.value.clone()
            };
            out.push_str(&format!("{} {} {} {}\n", self.package, answer.question, answer.kind, value));
        }
        out
    }
}

fn single_line(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect::<String>().trim().to_string()
}
