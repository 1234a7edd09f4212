use proc_macro2::Span;
use quote::ToTokens;
use std::collections::HashMap;
use syn::parse::ParseStream;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Attribute, Field, FieldsNamed, LitStr, Token};

/// 形如 `key = "value", ...` 的属性参数
pub(crate) struct StrArgs {
    values: HashMap<String, LitStr>,
}

impl StrArgs {
    /// 解析并校验键名；重复键与未知键均报错
    pub(crate) fn parse(input: ParseStream, allowed: &[&str]) -> syn::Result<Self> {
        let mut values = HashMap::new();
        if input.is_empty() {
            return Ok(Self { values });
        }

        let pairs = Punctuated::<syn::ExprAssign, Token![,]>::parse_terminated(input)?;
        for assign in pairs {
            let key = match *assign.left {
                syn::Expr::Path(p) if p.path.segments.len() == 1 => {
                    p.path.segments[0].ident.clone()
                }
                other => return Err(syn::Error::new(other.span(), "invalid attribute key")),
            };
            let name = key.to_string();
            if !allowed.contains(&name.as_str()) {
                return Err(syn::Error::new(
                    key.span(),
                    format!("unknown key; expected one of: {}", allowed.join(" | ")),
                ));
            }
            let lit: LitStr = match *assign.right {
                syn::Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Str(lit),
                    ..
                }) => lit,
                other => {
                    return Err(syn::Error::new(
                        other.span(),
                        format!("expected string literal for '{name}'"),
                    ));
                }
            };
            if values.insert(name.clone(), lit).is_some() {
                return Err(syn::Error::new(
                    key.span(),
                    format!("duplicate key '{name}' in attribute"),
                ));
            }
        }
        Ok(Self { values })
    }

    pub(crate) fn get(&self, key: &str) -> Option<&LitStr> {
        self.values.get(key)
    }

    /// 返回路由键片段；片段不能包含分隔符 `.`
    pub(crate) fn segment(&self, key: &str) -> syn::Result<Option<LitStr>> {
        match self.values.get(key) {
            Some(lit) => {
                let value = lit.value();
                if value.is_empty() || value.contains('.') {
                    return Err(syn::Error::new(
                        lit.span(),
                        format!("'{key}' must be a non-empty segment without '.'"),
                    ));
                }
                Ok(Some(lit.clone()))
            }
            None => Ok(None),
        }
    }
}

pub(crate) fn lit_str(value: &str, span: Span) -> LitStr {
    LitStr::new(value, span)
}

// 提取非 derive 属性与已有 derive 列表
fn split_derives(attrs: &[Attribute]) -> (Vec<Attribute>, Vec<syn::Path>) {
    let mut retained = Vec::new();
    let mut existing = Vec::new();
    for attr in attrs.iter() {
        if attr.path().is_ident("derive") {
            if let Ok(list) =
                attr.parse_args_with(Punctuated::<syn::Path, Token![,]>::parse_terminated)
            {
                existing.extend(list);
            }
        } else {
            retained.push(attr.clone());
        }
    }
    (retained, existing)
}

// 归一化 derive 的 key，避免 Serialize/serde::Serialize 重复
fn derive_key(p: &syn::Path) -> String {
    match p.segments.last() {
        Some(last) => {
            let ident = last.ident.to_string();
            match ident.as_str() {
                "Serialize" | "Deserialize" => format!("serde::{ident}"),
                _ => ident,
            }
        }
        None => p.to_token_stream().to_string(),
    }
}

/// 合并默认派生（去重，优先保留 required），合并后的 derive 置于最前
pub(crate) fn apply_derives(attrs: &mut Vec<Attribute>, required: Vec<syn::Path>) {
    let (retained, existing) = split_derives(attrs);
    let mut seen = std::collections::HashSet::<String>::new();
    let merged: Vec<syn::Path> = required
        .into_iter()
        .chain(existing)
        .filter(|p| seen.insert(derive_key(p)))
        .collect();
    let derive: Attribute = syn::parse_quote!(#[derive(#(#merged),*)]);
    *attrs = std::iter::once(derive).chain(retained).collect();
}

/// 字段缺失时追加到末尾，已存在则保持原样
pub(crate) fn ensure_field(fields_named: &mut FieldsNamed, name: &str, field: Field) {
    let exists = fields_named
        .named
        .iter()
        .any(|f| f.ident.as_ref().is_some_and(|i| i == name));
    if !exists {
        fields_named.named.push(field);
    }
}
