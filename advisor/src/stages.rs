use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageName {
    Research,
    Finance,
    Analysis,
    Editorial,
}

impl StageName {
    pub const ORDER: [StageName; 4] = [
        StageName::Research,
        StageName::Finance,
        StageName::Analysis,
        StageName::Editorial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Research => "research",
            StageName::Finance => "finance",
            StageName::Analysis => "analysis",
            StageName::Editorial => "editorial",
        }
    }

    pub fn agent_name(&self) -> &'static str {
        match self {
            StageName::Research => "ResearchAgent",
            StageName::Finance => "FinanceAgent",
            StageName::Analysis => "AnalysisAgent",
            StageName::Editorial => "EditorAgent",
        }
    }

    pub fn progress(&self) -> f32 {
        match self {
            StageName::Research => 0.0,
            StageName::Finance => 0.33,
            StageName::Analysis => 0.66,
            StageName::Editorial => 0.9,
        }
    }

    pub fn progress_description(&self) -> &'static str {
        match self {
            StageName::Research => "Starting research...",
            StageName::Finance => "Analyzing financials...",
            StageName::Analysis => "Making investment recommendation...",
            StageName::Editorial => "Compiling final report...",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StageName::ORDER
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownStage(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CapabilityRef {
    Search,
    MarketData,
}

#[derive(Clone, Debug)]
pub struct StageSpec {
    pub name: StageName,
    pub instructions: Vec<String>,
    pub capabilities: Vec<CapabilityRef>,
    /// Advisory only; communicated to the model, not enforced here.
    pub token_budget: usize,
}

impl StageSpec {
    fn new(
        name: StageName,
        instructions: &[&str],
        capabilities: &[CapabilityRef],
        token_budget: usize,
    ) -> Self {
        Self {
            name,
            instructions: instructions.iter().map(|s| s.to_string()).collect(),
            capabilities: capabilities.to_vec(),
            token_budget,
        }
    }

    pub fn system_prompt(&self) -> String {
        let mut prompt = self.instructions.join("\n");
        prompt.push_str(&format!(
            "\nKeep your response under {} tokens.",
            self.token_budget
        ));
        prompt.push_str("\nFormat your response as markdown.");
        prompt
    }
}

const RESEARCH_INSTRUCTIONS: &[&str] = &[
    "You are an investment research agent. Collect concise and relevant financial data using the web search tool.",
    "Summarize your findings clearly. Include only key updates on market trends, stock news, and fundamentals.",
    "Avoid long lists or deep history. Include only the top 3 relevant sources and cite them briefly.",
];

const FINANCE_INSTRUCTIONS: &[&str] = &[
    "You are a financial analyst. Summarize key metrics such as P/E, ROE, debt, and margins based on the research data.",
    "Keep the output short and clear. Explain only the most significant 3-5 metrics in simple terms.",
    "Avoid repetition or detailed background data unless critical.",
];

const ANALYSIS_INSTRUCTIONS: &[&str] = &[
    "You are an investment analyst. Based on the financial interpretation, provide a concise Buy, Hold, or Sell recommendation.",
    "Justify your answer with 2-3 solid points and avoid excessive explanation.",
    "Summarize investment risks and opportunities briefly.",
];

const EDITORIAL_INSTRUCTIONS: &[&str] = &[
    "You are a financial editor. Combine all agent outputs into a single professional summary.",
    "Use headings and markdown formatting, and avoid repetition.",
    "Keep the language clear, engaging, and suitable for a decision-making investor.",
];

#[derive(Clone, Debug)]
pub struct StageRegistry {
    specs: HashMap<StageName, StageSpec>,
}

impl StageRegistry {
    pub fn new(specs: impl IntoIterator<Item = StageSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|spec| (spec.name, spec)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&StageSpec> {
        let stage = name.parse::<StageName>()?;
        self.stage(stage)
    }

    fn stage(&self, name: StageName) -> Result<&StageSpec> {
        self.specs
            .get(&name)
            .ok_or_else(|| Error::UnknownStage(name.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        StageName::ORDER
            .iter()
            .try_for_each(|name| self.stage(*name).map(|_| ()))
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new([
            StageSpec::new(
                StageName::Research,
                RESEARCH_INSTRUCTIONS,
                &[CapabilityRef::Search],
                1000,
            ),
            StageSpec::new(
                StageName::Finance,
                FINANCE_INSTRUCTIONS,
                &[CapabilityRef::MarketData],
                1000,
            ),
            StageSpec::new(
                StageName::Analysis,
                ANALYSIS_INSTRUCTIONS,
                &[CapabilityRef::MarketData],
                1000,
            ),
            StageSpec::new(StageName::Editorial, EDITORIAL_INSTRUCTIONS, &[], 1500),
        ])
    }
}
