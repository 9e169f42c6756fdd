use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident, Path};

#[proc_macro_derive(HierarchyModel, attributes(hierarchy))]
pub fn derive_hierarchy_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_hierarchy_model(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    id_field: Option<String>,
    path_module: Option<Path>,
    path_table: Option<String>,
    entity_name: Option<String>,
    path_name: Option<String>,
    path_id_field: Option<String>,
    ancestor_field: Option<String>,
    descendant_field: Option<String>,
    depth_field: Option<String>,
}

fn impl_hierarchy_model(input: &DeriveInput) -> syn::Result<TokenStream> {
    let struct_ident = &input.ident;

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "HierarchyModel can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("hierarchy") {
            parse_hierarchy_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let id_field_name = options.id_field.unwrap_or_else(|| "id".to_string());
    let path_id_field_name = options.path_id_field.unwrap_or_else(|| "id".to_string());
    let ancestor_field_name = options
        .ancestor_field
        .unwrap_or_else(|| "ancestor".to_string());
    let descendant_field_name = options
        .descendant_field
        .unwrap_or_else(|| "descendant".to_string());
    let depth_field_name = options.depth_field.unwrap_or_else(|| "depth".to_string());

    let id_field_ident = Ident::new(&id_field_name, struct_ident.span());
    let path_id_field_ident = Ident::new(&path_id_field_name, struct_ident.span());
    let ancestor_field_ident = Ident::new(&ancestor_field_name, struct_ident.span());
    let descendant_field_ident = Ident::new(&descendant_field_name, struct_ident.span());
    let depth_field_ident = Ident::new(&depth_field_name, struct_ident.span());

    let Fields::Named(ref fields) = data_struct.fields else {
        return Err(syn::Error::new(
            data_struct.fields.span(),
            "HierarchyModel requires named fields",
        ));
    };
    if !fields
        .named
        .iter()
        .any(|field| field.ident.as_ref() == Some(&id_field_ident))
    {
        return Err(syn::Error::new(
            struct_ident.span(),
            format!("no field named `{id_field_name}`; set `id_field = ...` in #[hierarchy]"),
        ));
    }

    let path_module = options
        .path_module
        .ok_or_else(|| syn::Error::new(struct_ident.span(), "`path_module` must be set"))?;

    let entity_name = options
        .entity_name
        .unwrap_or_else(|| struct_ident.unraw().to_string());
    let path_name = options.path_name.unwrap_or_else(|| {
        if entity_name.ends_with("Path") {
            entity_name.clone()
        } else {
            format!("{}Path", entity_name)
        }
    });

    let base_table = table_name.unwrap_or_else(|| struct_ident.unraw().to_string());
    let path_table = options
        .path_table
        .unwrap_or_else(|| format!("{}_paths", base_table));

    let id_column_variant = format_ident!("{}", to_pascal_case(&id_field_name));
    let path_id_column_variant = format_ident!("{}", to_pascal_case(&path_id_field_name));
    let ancestor_column_variant = format_ident!("{}", to_pascal_case(&ancestor_field_name));
    let descendant_column_variant = format_ident!("{}", to_pascal_case(&descendant_field_name));
    let depth_column_variant = format_ident!("{}", to_pascal_case(&depth_field_name));

    let path_table_literal = syn::LitStr::new(&path_table, struct_ident.span());
    let entity_name_literal = syn::LitStr::new(&entity_name, struct_ident.span());
    let path_name_literal = syn::LitStr::new(&path_name, struct_ident.span());

    let generated = quote! {
        impl ::closure_hierarchy::HierarchyModel for #struct_ident {
            type Entity = Entity;
            type ActiveModel = ActiveModel;

            type PathEntity = #path_module::Entity;
            type PathModel = #path_module::Model;
            type PathActiveModel = #path_module::ActiveModel;

            fn hierarchy_config() -> &'static ::closure_hierarchy::HierarchyConfig {
                static CONFIG: ::closure_hierarchy::__private::once_cell::sync::Lazy<
                    ::closure_hierarchy::HierarchyConfig,
                > = ::closure_hierarchy::__private::once_cell::sync::Lazy::new(|| {
                    let base = ::closure_hierarchy::HierarchyConfig::new(
                        #entity_name_literal,
                        #path_name_literal,
                    );
                    ::closure_hierarchy::HierarchyOptions::default()
                        .path_table(#path_table_literal)
                        .apply(base)
                });
                &CONFIG
            }

            fn node_id(&self) -> ::closure_hierarchy::NodeId {
                ::core::convert::Into::into(self.#id_field_ident)
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column_variant
            }

            fn path_id_column() -> <Self::PathEntity as ::sea_orm::EntityTrait>::Column {
                #path_module::Column::#path_id_column_variant
            }

            fn path_ancestor_column() -> <Self::PathEntity as ::sea_orm::EntityTrait>::Column {
                #path_module::Column::#ancestor_column_variant
            }

            fn path_descendant_column() -> <Self::PathEntity as ::sea_orm::EntityTrait>::Column {
                #path_module::Column::#descendant_column_variant
            }

            fn path_depth_column() -> <Self::PathEntity as ::sea_orm::EntityTrait>::Column {
                #path_module::Column::#depth_column_variant
            }

            fn path_row(model: &Self::PathModel) -> ::closure_hierarchy::PathRow {
                ::closure_hierarchy::PathRow {
                    id: ::core::convert::Into::into(model.#path_id_field_ident),
                    ancestor: model.#ancestor_field_ident.map(::core::convert::Into::into),
                    descendant: model.#descendant_field_ident.map(::core::convert::Into::into),
                    depth: model.#depth_field_ident,
                }
            }

            fn build_path(path: ::closure_hierarchy::NewPath) -> Self::PathActiveModel {
                #[allow(clippy::needless_update)]
                {
                    #path_module::ActiveModel {
                        #ancestor_field_ident: ::sea_orm::ActiveValue::Set(Some(path.ancestor)),
                        #descendant_field_ident: ::sea_orm::ActiveValue::Set(Some(path.descendant)),
                        #depth_field_ident: ::sea_orm::ActiveValue::Set(path.depth),
                        ..::core::default::Default::default()
                    }
                }
            }
        }
    };

    Ok(generated.into())
}

fn parse_hierarchy_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        let value: syn::LitStr = meta.value()?.parse()?;
        match ident.as_str() {
            "id_field" => options.id_field = Some(value.value()),
            "path_module" => options.path_module = Some(parse_path(&value.value(), value.span())?),
            "path_table" => options.path_table = Some(value.value()),
            "entity_name" => options.entity_name = Some(value.value()),
            "path_name" => options.path_name = Some(value.value()),
            "path_id_field" => options.path_id_field = Some(value.value()),
            "ancestor_field" => options.ancestor_field = Some(value.value()),
            "descendant_field" => options.descendant_field = Some(value.value()),
            "depth_field" => options.depth_field = Some(value.value()),
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported hierarchy option `{other}`"),
                ));
            }
        }

        Ok(())
    })
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: syn::LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(syn::Token![=]) {
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn parse_path(value: &str, span: proc_macro2::Span) -> syn::Result<Path> {
    syn::parse_str::<Path>(value).map_err(|_| syn::Error::new(span, "Invalid path"))
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
