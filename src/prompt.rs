//! Query-context prompt
//!
//! Wraps a serialized schema and a free-text question into the instruction
//! handed to an external natural-language-to-SQL service. Nothing here
//! calls that service.

/// Prompt template; `{schema}` and `{question}` are substituted
pub const QUERY_PROMPT_TEMPLATE: &str = r#"Please write a SQL query using the database schema: [{schema}], to answer the following question: "{question}".
Please do not include anything other than the SQL query in your response. Ensure all joins, table references and column references match the provided schema."#;

/// Schema text plus question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPrompt {
    schema: String,
    question: String,
}

impl QueryPrompt {
    pub fn new(schema: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            question: question.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    /// Build the instruction text
    pub fn build(&self) -> String {
        QUERY_PROMPT_TEMPLATE
            .replace("{schema}", self.schema.trim_end())
            .replace("{question}", self.question.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_substitutes_both_parts() {
        let prompt = QueryPrompt::new(
            "Database Schema Description:\nRelations:\n",
            "  How many orders per customer?  ",
        );
        let text = prompt.build();
        assert!(text.contains("[Database Schema Description:\nRelations:]"));
        assert!(text.contains("\"How many orders per customer?\""));
        assert!(text.contains("anything other than the SQL query"));
        assert!(!text.contains("{schema}"));
    }
}
