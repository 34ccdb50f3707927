//! 工具注册表
//!
//! 每个工具实现 TypedTool（强类型参数 + 描述渲染 + 异步执行），注册时包装成 `Arc<dyn Tool>`。
//! 注册只在启动时进行；注册表随后移入 ToolDispatcher，运行期间只读。

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::gen::SchemaGenerator;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::ToolContext;

/// 动态工具接口（由 TypedTool 自动实现，分发器只看到这一层）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// 工具描述（供模型理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value;

    /// 一行可读描述（用于展示工具调用）；参数无法解析时返回 None
    fn describe(&self, args: &Value) -> Option<String>;

    /// 调用即结束本次运行
    fn is_terminal(&self) -> bool {
        false
    }

    /// 等待用户输入的工具不受全局超时限制
    fn waits_for_user(&self) -> bool {
        false
    }

    /// 解码参数并执行
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<String, ToolError>;
}

/// 强类型工具：参数在分发边界一次性解码为 Args，解码失败即 ArgumentDecode
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    type Args: DeserializeOwned + JsonSchema + Send + 'static;

    /// 工具名（模型调用时使用）
    const NAME: &'static str;

    fn description(&self) -> &str;

    /// 根据参数生成一行可读描述
    fn describe(&self, args: &Self::Args) -> String;

    fn is_terminal(&self) -> bool {
        false
    }

    fn waits_for_user(&self) -> bool {
        false
    }

    async fn call(&self, ctx: &ToolContext, args: Self::Args) -> Result<String, ToolError>;
}

/// TypedTool -> Tool 适配
struct TypedAdapter<T: TypedTool> {
    tool: T,
    _args: PhantomData<fn() -> T::Args>,
}

impl<T: TypedTool> TypedAdapter<T> {
    fn decode(&self, args: Value) -> Result<T::Args, ToolError> {
        serde_json::from_value(args).map_err(|e| ToolError::ArgumentDecode {
            tool: T::NAME.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl<T: TypedTool> Tool for TypedAdapter<T> {
    fn name(&self) -> &str {
        T::NAME
    }

    fn description(&self) -> &str {
        self.tool.description()
    }

    fn parameters_schema(&self) -> Value {
        let schema = SchemaGenerator::default().into_root_schema_for::<T::Args>();
        serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
    }

    fn describe(&self, args: &Value) -> Option<String> {
        self.decode(args.clone()).ok().map(|a| self.tool.describe(&a))
    }

    fn is_terminal(&self) -> bool {
        self.tool.is_terminal()
    }

    fn waits_for_user(&self) -> bool {
        self.tool.waits_for_user()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<String, ToolError> {
        let args = self.decode(args)?;
        self.tool.call(ctx, args).await
    }
}

/// 对外公开的工具规格（名称、描述、参数 schema），供模型执行器声明可用工具
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具注册表：按名称存储 `Arc<dyn Tool>`
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具后注册者覆盖前者
    pub fn register<T: TypedTool>(&mut self, tool: T) {
        let adapter = TypedAdapter {
            tool,
            _args: PhantomData,
        };
        if self
            .tools
            .insert(T::NAME.to_string(), Arc::new(adapter))
            .is_some()
        {
            tracing::warn!(tool = T::NAME, "tool registered twice, keeping the last one");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// 一行可读描述；未注册或参数无法解析时退回 `Using tool: <name>`
    pub fn render(&self, name: &str, args: &Value) -> String {
        self.tools
            .get(name)
            .and_then(|t| t.describe(args))
            .unwrap_or_else(|| format!("Using tool: {name}"))
    }

    pub fn is_terminal(&self, name: &str) -> bool {
        self.tools.get(name).map(|t| t.is_terminal()).unwrap_or(false)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 按名称排序的工具规格列表
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tool_names()
            .into_iter()
            .filter_map(|name| {
                let tool = self.tools.get(&name)?;
                Some(ToolSpec {
                    description: tool.description().to_string(),
                    parameters: tool.parameters_schema(),
                    name,
                })
            })
            .collect()
    }

    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.specs()).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    #[serde(deny_unknown_fields)]
    struct GreetArgs {
        who: String,
    }

    struct GreetTool;

    #[async_trait]
    impl TypedTool for GreetTool {
        type Args = GreetArgs;
        const NAME: &'static str = "greet";

        fn description(&self) -> &str {
            "Say hello"
        }

        fn describe(&self, args: &GreetArgs) -> String {
            format!("Greeting {}", args.who)
        }

        async fn call(&self, _ctx: &ToolContext, args: GreetArgs) -> Result<String, ToolError> {
            Ok(format!("hello {}", args.who))
        }
    }

    #[test]
    fn test_render_with_and_without_renderer() {
        let mut registry = ToolRegistry::new();
        registry.register(GreetTool);
        assert_eq!(
            registry.render("greet", &serde_json::json!({"who": "bee"})),
            "Greeting bee"
        );
        assert_eq!(
            registry.render("greet", &serde_json::json!({"nobody": 1})),
            "Using tool: greet"
        );
        assert_eq!(
            registry.render("missing", &serde_json::json!({})),
            "Using tool: missing"
        );
    }

    #[test]
    fn test_lookup_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.lookup("nope"),
            Err(ToolError::UnknownTool(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_specs_include_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(GreetTool);
        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "greet");
        assert!(specs[0].parameters["properties"].get("who").is_some());
        assert!(registry.to_schema_json().contains("\"greet\""));
    }

    #[tokio::test]
    async fn test_execute_rejects_unknown_fields() {
        let mut registry = ToolRegistry::new();
        registry.register(GreetTool);
        let ctx = ToolContext::default();
        let tool = registry.lookup("greet").unwrap();
        let ok = tool.execute(&ctx, serde_json::json!({"who": "x"})).await;
        assert_eq!(ok.unwrap(), "hello x");
        let err = tool
            .execute(&ctx, serde_json::json!({"who": "x", "extra": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ArgumentDecode { .. }));
    }
}
