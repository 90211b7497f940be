//! Friendly names for agent tool modules.

const KNOWN_TOOLS: &[(&str, &str)] = &[
    ("agentools.tools.deepsearch_opt", "Deep Search Tool"),
    ("agentools.tools.yfinance_tools", "Financial Data (Yahoo Finance)"),
    ("agentools.tools.trending_news", "Trending News"),
    ("agentools.tools.computer_tools", "Computer Tools"),
    ("agentools.tools.websearch_tools", "Web Search"),
    ("agentools.tools.terminal_tools", "Terminal Access"),
    ("agentools.tools.alpha_vantage_tools", "Financial Data (Alpha Vantage)"),
];

/// Display name for a tool module; unknown modules show as-is.
pub fn tool_display_name(module: &str) -> &str {
    KNOWN_TOOLS
        .iter()
        .find(|(m, _)| *m == module)
        .map(|(_, name)| *name)
        .unwrap_or(module)
}
