// reportgraph schema - report graph tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    projects (id) {
        id -> Text,                      // UUID
        name -> Text,
        client -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    reports (id) {
        id -> Text,                      // UUID
        project_id -> Text,              // FK to projects.id
        title -> Text,
        status -> Text,                  // draft | in_review | approved | published
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    report_nodes (id) {
        id -> Text,                      // UUID
        report_id -> Text,               // FK to reports.id
        node_type -> Text,
        parent_id -> Nullable<Text>,     // FK to report_nodes.id, same report
        sort_order -> BigInt,            // Authoritative document order
        position_x -> Double,
        position_y -> Double,
        data -> Text,                    // Payload JSON, shape fixed by node_type
        ai_generated -> Bool,
        linked_resource_ids -> Text,     // JSON array of resource ids
        color -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    resources (id) {
        id -> Text,                      // UUID
        project_id -> Text,              // FK to projects.id
        resource_type -> Text,           // note | pdf | image | table | link | other
        title -> Text,
        content -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    report_activity (id) {
        id -> Integer,
        report_id -> Text,               // FK to reports.id
        activity_type -> Text,
        details -> Nullable<Text>,       // JSON
        created_at -> Text,
    }
}

diesel::joinable!(reports -> projects (project_id));
diesel::joinable!(resources -> projects (project_id));
diesel::joinable!(report_nodes -> reports (report_id));
diesel::joinable!(report_activity -> reports (report_id));

diesel::allow_tables_to_appear_in_same_query!(
    projects,
    reports,
    report_nodes,
    resources,
    report_activity,
);
