//! Step 18: the composite Urban Liveability Index.
//!
//! MPI (Mazziotta-Pareto) composite over 16 parcel-level indicators, built
//! inside its own schema in both hard- and soft-cutoff forms:
//!
//! 1. group the destination access scores into domain indicators;
//! 2. summarise raw indicator mean/sd/min/max;
//! 3. compress outliers with a hard-knee `clean()` between 2 and 3 SD;
//! 4. normalise to 100 +/- 10 z-score units, flipping polarity for air
//!    pollution;
//! 5. estimate the parcel composite as mean - sd^2/mean over the
//!    normalised indicators (with an air-quality-excluded variant);
//! 6. rank parcels by cumulative distribution and attach geometry;
//! 7. restate suburb/LGA membership per SA1, SA2 and suburb for the area
//!    summaries that follow.

use async_trait::async_trait;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::pipeline::{Step, StepContext};

/// Outlier compression: values beyond 2 SD are squeezed so the tail
/// reaches its extreme by 3 SD.
const CLEAN_FN: &str = "
CREATE OR REPLACE FUNCTION clean(
    var double precision,
    min_val double precision,
    max_val double precision,
    mean double precision,
    sd double precision) RETURNS double precision AS
$$
DECLARE
  ll double precision := mean - 2*sd;
  ul double precision := mean + 2*sd;
  c  double precision := 1*sd;
BEGIN
  IF (min_val < ll-c) AND (var < ll) THEN
    RETURN ll - c + c*(var - min_val)/(ll - min_val);
  ELSIF (max_val > ul+c) AND (var > ul) THEN
    RETURN ul + c*(var - ul)/(max_val - ul);
  ELSE
    RETURN var;
  END IF;
END;
$$
LANGUAGE plpgsql
RETURNS NULL ON NULL INPUT;";

/// One indicator feeding the composite.
#[derive(Debug, Clone)]
struct Indicator {
    /// Column name carried from the cleaned stage onward.
    alias: String,
    /// Source column in `table`.
    column: String,
    table: String,
    /// Joined on meshblock code rather than parcel id.
    meshblock_join: bool,
    /// Higher raw values raise the index; air pollution is the exception.
    positive: bool,
}

impl Indicator {
    fn parcel(alias: &str, column: &str, table: &str) -> Self {
        Self {
            alias: alias.to_string(),
            column: column.to_string(),
            table: table.to_string(),
            meshblock_join: false,
            positive: true,
        }
    }

    fn join_alias(&self) -> String {
        format!("t_{}", self.table.replace('.', "_"))
    }
}

/// The 16 indicators of one form (hard or soft), in array order.
fn indicators(config: &Config, form: &str) -> Vec<Indicator> {
    let d = config.network.distance;
    let schema = &config.workspace.uli_schema;
    let groups = format!("{schema}.ind_groups_{form}");
    let dests = format!("ind_dest_{form}");
    let dd = format!("dd_nh{d}m");
    let sc = format!("sc_nh{d}m");

    let mut list = vec![
        Indicator::parcel(&dd, &dd, "dwelling_density"),
        Indicator::parcel(&sc, &sc, "street_connectivity"),
        Indicator::parcel(
            "pos15000_access",
            &format!("pos_greq15000m2_in_400m_{form}"),
            "ind_pos",
        ),
        Indicator::parcel(
            "sa1_prop_affordablehousing",
            "sa1_prop_affordablehous_30_40",
            "ind_abs",
        ),
        Indicator::parcel("sa2_prop_live_work_sa3", "sa2_prop_live_work_sa3", "ind_abs"),
    ];
    for group in [
        "community_culture_leisure",
        "early_years",
        "education",
        "health_services",
        "sport_rec",
        "food",
        "convenience",
    ] {
        list.push(Indicator::parcel(group, group, &groups));
    }
    for pt in ["busstop2012_400m", "tramstops2012_600m", "trainstations2012_800m"] {
        list.push(Indicator::parcel(pt, pt, &dests));
    }
    list.push(Indicator {
        alias: "air_no2".to_string(),
        column: "pred_no2_2011_col_ppb".to_string(),
        table: config.air_pollution.no2_table.clone(),
        meshblock_join: true,
        positive: false,
    });
    list
}

/// Alias list of one form, in array order, for the area summaries.
pub(crate) fn indicator_aliases(config: &Config, form: &str) -> Vec<String> {
    indicators(config, form).into_iter().map(|i| i.alias).collect()
}

pub struct UrbanLiveabilityIndex;

#[async_trait]
impl Step for UrbanLiveabilityIndex {
    fn seq(&self) -> u16 {
        18
    }

    fn slug(&self) -> &'static str {
        "uli"
    }

    fn task(&self) -> &'static str {
        "Create parcel-based Urban Liveability Index composite in its own schema"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["clean_li_parcel_ci_hard".into(), "clean_li_parcel_ci_soft".into()]
    }

    async fn run(&self, ctx: &StepContext) -> Result<()> {
        let mut conn = ctx.conn()?;
        let schema = &ctx.config.workspace.uli_schema;

        db::execute_all(
            &mut conn,
            &[
                format!("DROP SCHEMA IF EXISTS {schema} CASCADE;"),
                format!("CREATE SCHEMA {schema};"),
                CLEAN_FN.to_string(),
            ],
        )?;
        info!(schema = %schema, "index schema reset");

        for form in ["hard", "soft"] {
            let builder = UliBuilder::new(&ctx.config, form);
            db::execute_all(&mut conn, &builder.statements())?;
            info!(
                form,
                parcels =
                    db::table_count(&mut conn, &format!("{schema}.clean_li_parcel_ci_{form}"))?,
                "composite index built"
            );
        }

        db::execute_all(&mut conn, &area_linkage_statements(schema))?;
        Ok(())
    }
}

/// Assembles the SQL for one form of the index.
struct UliBuilder {
    schema: String,
    form: String,
    pid: String,
    mb: String,
    indicators: Vec<Indicator>,
    exclusion: String,
}

impl UliBuilder {
    fn new(config: &Config, form: &str) -> Self {
        let pid = config.parcels.id_column();
        Self {
            schema: config.workspace.uli_schema.clone(),
            form: form.to_string(),
            mb: config.parcels.meshblock_code.clone(),
            indicators: indicators(config, form),
            exclusion: format!(
                "WHERE {pid} NOT IN (SELECT DISTINCT({pid}) FROM excluded_parcels)"
            ),
            pid,
        }
    }

    fn statements(&self) -> Vec<String> {
        let mut statements = self.group_table();
        for func in ["AVG", "stddev_pop", "min", "max"] {
            statements.extend(self.raw_summary_table(func));
        }
        statements.extend(self.clean_raw_table());
        for func in ["AVG", "stddev_pop"] {
            statements.extend(self.clean_summary_table(func));
        }
        statements.extend(self.mpi_norm_table());
        statements.extend(self.ci_estimate_tables());
        statements.extend(self.parcel_ci_table());
        statements.extend(self.raw_indicator_table());
        statements.extend(self.percentile_table());
        statements
    }

    /// Destination access scores averaged within their domain groups.
    fn group_table(&self) -> Vec<String> {
        let Self {
            schema, form, pid, ..
        } = self;
        let table = format!("{schema}.ind_groups_{form}");
        vec![
            format!("DROP TABLE IF EXISTS {table};"),
            format!(
                "CREATE TABLE {table} AS
                 SELECT {pid},
                        (COALESCE(communitycentre_1000m, 0)
                         + COALESCE(museumartgallery_3200m, 0)
                         + COALESCE(cinematheatre_3200m, 0)
                         + COALESCE(libraries_2014_1000m, 0)) / 4.0 AS community_culture_leisure,
                        (COALESCE(childcareoutofschool_1600m, 0)
                         + COALESCE(childcare_800m, 0)) / 2.0 AS early_years,
                        (COALESCE(statesecondaryschools_1600m, 0)
                         + COALESCE(stateprimaryschools_1600m, 0)) / 2.0 AS education,
                        (COALESCE(agedcare_2012_1000m, 0)
                         + COALESCE(communityhealthcentres_1000m, 0)
                         + COALESCE(dentists_1000m, 0)
                         + COALESCE(gp_clinics_1000m, 0)
                         + COALESCE(maternalchildhealth_1000m, 0)
                         + COALESCE(pharmacy_1000m, 0)) / 6.0 AS health_services,
                        (COALESCE(swimmingpools_1200m, 0)
                         + COALESCE(sport_1200m, 0)) / 2.0 AS sport_rec,
                        (COALESCE(supermarkets_1000m, 0)
                         + COALESCE(fishmeatpoultryshops_1600m, 0)
                         + COALESCE(fruitvegeshops_1600m, 0)) / 3.0 AS food,
                        (COALESCE(conveniencestores_1000m, 0)
                         + COALESCE(petrolstations_1000m, 0)
                         + COALESCE(newsagents_1000m, 0)) / 3.0 AS convenience
                   FROM ind_dest_{form}
                  {exclusion};",
                exclusion = self.exclusion
            ),
        ]
    }

    fn summary_suffix(func: &str) -> &'static str {
        match func {
            "AVG" => "means",
            "stddev_pop" => "sd",
            "min" => "min",
            _ => "max",
        }
    }

    fn raw_summary_table(&self, func: &str) -> Vec<String> {
        let Self { schema, form, mb, .. } = self;
        let table = format!("{schema}.ind_summary_{}_li_{form}", Self::summary_suffix(func));
        let cols: Vec<String> = self
            .indicators
            .iter()
            .map(|ind| {
                // Meshblock-linked sources are weighted per parcel, not per
                // meshblock, so they route through parcelmb like the rest.
                let source = if ind.meshblock_join {
                    format!(
                        "parcelmb LEFT JOIN {t} ON parcelmb.{mb} = {t}.{mb}",
                        t = ind.table
                    )
                } else {
                    ind.table.clone()
                };
                format!(
                    "(SELECT {func}({column}) FROM {source} {filter}) AS {alias}",
                    column = ind.column,
                    filter = self.exclusion,
                    alias = ind.alias
                )
            })
            .collect();
        vec![
            format!("DROP TABLE IF EXISTS {table};"),
            format!(
                "CREATE TABLE {table} AS SELECT {};",
                cols.join(",\n       ")
            ),
        ]
    }

    /// One LEFT JOIN per distinct indicator source table.
    fn indicator_joins(&self) -> String {
        let Self { pid, mb, .. } = self;
        let mut joins = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for ind in &self.indicators {
            if !seen.insert(ind.table.clone()) {
                continue;
            }
            let alias = ind.join_alias();
            let on = if ind.meshblock_join {
                format!("parcelmb.{mb} = {alias}.{mb}")
            } else {
                format!("parcelmb.{pid} = {alias}.{pid}")
            };
            joins.push(format!("LEFT JOIN {} AS {alias} ON {on}", ind.table));
        }
        joins.join("\n       ")
    }

    fn linkage_columns(&self) -> String {
        let Self { pid, mb, .. } = self;
        format!(
            "parcelmb.{pid},
       abs_linkage.{mb},
       abs_linkage.sa1_7dig11,
       abs_linkage.sa2_name11,
       abs_linkage.sa3_name11,
       abs_linkage.ste_name11,
       non_abs_linkage.ssc_name,
       non_abs_linkage.lga_name11"
        )
    }

    fn clean_raw_table(&self) -> Vec<String> {
        let Self {
            schema, form, pid, mb, ..
        } = self;
        let table = format!("{schema}.clean_raw_ind_li_{form}");
        let cols: Vec<String> = self
            .indicators
            .iter()
            .map(|ind| {
                format!(
                    "clean({ja}.{column}, _min.{alias}, _max.{alias}, _mean.{alias}, _sd.{alias}) AS {alias}",
                    ja = ind.join_alias(),
                    column = ind.column,
                    alias = ind.alias
                )
            })
            .collect();
        vec![
            format!("DROP TABLE IF EXISTS {table};"),
            format!(
                "CREATE TABLE {table} AS
                 SELECT {linkage},
       {cols}
                   FROM parcelmb
                   LEFT JOIN abs_linkage ON parcelmb.{mb} = abs_linkage.{mb}
                   LEFT JOIN non_abs_linkage ON parcelmb.{pid} = non_abs_linkage.{pid}
       {joins},
                        {schema}.ind_summary_means_li_{form} AS _mean,
                        {schema}.ind_summary_sd_li_{form} AS _sd,
                        {schema}.ind_summary_min_li_{form} AS _min,
                        {schema}.ind_summary_max_li_{form} AS _max
                  WHERE parcelmb.{pid} NOT IN (SELECT DISTINCT({pid}) FROM excluded_parcels);",
                linkage = self.linkage_columns(),
                cols = cols.join(",\n       "),
                joins = self.indicator_joins()
            ),
            format!("ALTER TABLE {table} ADD PRIMARY KEY ({pid});"),
        ]
    }

    fn clean_summary_table(&self, func: &str) -> Vec<String> {
        let Self { schema, form, .. } = self;
        let table = format!(
            "{schema}.clean_ind_summary_{}_li_{form}",
            Self::summary_suffix(func)
        );
        let cols: Vec<String> = self
            .indicators
            .iter()
            .map(|ind| format!("{func}({alias}) AS {alias}", alias = ind.alias))
            .collect();
        vec![
            format!("DROP TABLE IF EXISTS {table};"),
            format!(
                "CREATE TABLE {table} AS SELECT {} FROM {schema}.clean_raw_ind_li_{form};",
                cols.join(",\n       ")
            ),
        ]
    }

    /// 100 +/- 10 z-score units; polarity flips for negative indicators.
    fn mpi_norm_table(&self) -> Vec<String> {
        let Self {
            schema, form, pid, ..
        } = self;
        let table = format!("{schema}.clean_ind_mpi_norm_{form}");
        let cols: Vec<String> = self
            .indicators
            .iter()
            .map(|ind| {
                let sign = if ind.positive { "+" } else { "-" };
                format!(
                    "100 {sign} 10 * (t.{alias} - _mean.{alias}) / _sd.{alias}::double precision AS {alias}",
                    alias = ind.alias
                )
            })
            .collect();
        vec![
            format!("DROP TABLE IF EXISTS {table};"),
            format!(
                "CREATE TABLE {table} AS
                 SELECT t.{pid},
                        t.{mb},
                        t.sa1_7dig11,
                        t.sa2_name11,
                        t.sa3_name11,
                        t.ste_name11,
                        t.ssc_name,
                        t.lga_name11,
       {cols}
                   FROM {schema}.clean_raw_ind_li_{form} AS t,
                        {schema}.clean_ind_summary_means_li_{form} AS _mean,
                        {schema}.clean_ind_summary_sd_li_{form} AS _sd;",
                mb = self.mb,
                cols = cols.join(",\n       ")
            ),
            format!("ALTER TABLE {table} ADD PRIMARY KEY ({pid});"),
        ]
    }

    /// Parcel MPI estimate: mean - sd^2/mean over the normalised
    /// indicators, with an air-quality-excluded variant.
    fn ci_estimate_tables(&self) -> Vec<String> {
        let Self {
            schema, form, pid, ..
        } = self;
        let all: Vec<&str> = self.indicators.iter().map(|i| i.alias.as_str()).collect();
        let excl_air: Vec<&str> = self
            .indicators
            .iter()
            .filter(|i| i.positive)
            .map(|i| i.alias.as_str())
            .collect();

        let estimate = |table: String, aliases: &[&str]| {
            vec![
                format!("DROP TABLE IF EXISTS {table};"),
                format!(
                    "CREATE TABLE {table} AS
                     SELECT {pid},
                            AVG(val) AS mean,
                            stddev_pop(val) AS sd,
                            stddev_pop(val)/AVG(val) AS cv,
                            AVG(val) - (stddev_pop(val)^2)/AVG(val) AS li_ci_est
                       FROM (SELECT {pid},
                                    unnest(array[{array}]) AS val
                               FROM {schema}.clean_ind_mpi_norm_{form}) t
                      GROUP BY {pid};",
                    array = aliases.join(",")
                ),
                format!("ALTER TABLE {table} ADD PRIMARY KEY ({pid});"),
            ]
        };

        let mut statements = estimate(format!("{schema}.clean_li_ci_{form}_est"), &all);
        statements.extend(estimate(
            format!("{schema}.clean_li_ci_{form}_est_excl_airqual"),
            &excl_air,
        ));
        statements
    }

    fn parcel_ci_table(&self) -> Vec<String> {
        let Self {
            schema, form, pid, ..
        } = self;
        let table = format!("{schema}.clean_li_parcel_ci_{form}");
        vec![
            format!("DROP TABLE IF EXISTS {table};"),
            format!(
                "CREATE TABLE {table} AS
                 SELECT n.*,
                        est.li_ci_est,
                        excl.li_ci_est AS li_ci_est_excl_airqual
                   FROM {schema}.clean_ind_mpi_norm_{form} n
                   LEFT JOIN {schema}.clean_li_ci_{form}_est est
                          ON est.{pid} = n.{pid}
                   LEFT JOIN {schema}.clean_li_ci_{form}_est_excl_airqual excl
                          ON excl.{pid} = n.{pid};"
            ),
            format!("ALTER TABLE {table} ADD PRIMARY KEY ({pid});"),
        ]
    }

    /// Raw (uncleaned, unnormalised) indicator values with the composite
    /// estimate, for the area variation summaries.
    fn raw_indicator_table(&self) -> Vec<String> {
        let Self {
            schema, form, pid, mb, ..
        } = self;
        let table = format!("{schema}.raw_indicators_{form}");
        let cols: Vec<String> = self
            .indicators
            .iter()
            .map(|ind| {
                format!(
                    "{ja}.{column} AS {alias}",
                    ja = ind.join_alias(),
                    column = ind.column,
                    alias = ind.alias
                )
            })
            .collect();
        vec![
            format!("DROP TABLE IF EXISTS {table};"),
            format!(
                "CREATE TABLE {table} AS
                 SELECT {linkage},
                        est.li_ci_est,
       {cols}
                   FROM parcelmb
                   LEFT JOIN abs_linkage ON parcelmb.{mb} = abs_linkage.{mb}
                   LEFT JOIN non_abs_linkage ON parcelmb.{pid} = non_abs_linkage.{pid}
                   LEFT JOIN {schema}.clean_li_ci_{form}_est est ON est.{pid} = parcelmb.{pid}
       {joins}
                  WHERE parcelmb.{pid} NOT IN (SELECT DISTINCT({pid}) FROM excluded_parcels);",
                linkage = self.linkage_columns(),
                cols = cols.join(",\n       "),
                joins = self.indicator_joins()
            ),
            format!("ALTER TABLE {table} ADD PRIMARY KEY ({pid});"),
        ]
    }

    /// Address-level percentile of the composite, with point geometry for
    /// mapping.
    fn percentile_table(&self) -> Vec<String> {
        let Self {
            schema, form, pid, ..
        } = self;
        let table = format!("{schema}.clean_li_percentile_{form}");
        vec![
            format!("DROP TABLE IF EXISTS {table};"),
            format!(
                "CREATE TABLE {table} AS
                 SELECT t1.{pid},
                        round(100 * cume_dist() OVER (ORDER BY li_ci_est)::numeric, 0)
                          AS li_ci_est,
                        t2.geom
                   FROM {schema}.clean_li_parcel_ci_{form} AS t1
                   LEFT JOIN parcel_xy AS t2 ON t1.{pid} = t2.{pid};"
            ),
        ]
    }
}

/// Suburb and LGA membership per SA1, SA2 and suburb, restated from the
/// hard-form raw indicators for labelling the area summaries.
fn area_linkage_statements(schema: &str) -> Vec<String> {
    vec![
        format!("DROP TABLE IF EXISTS {schema}.sa1_area;"),
        format!(
            "CREATE TABLE {schema}.sa1_area AS
             SELECT sa1_7dig11,
                    string_agg(DISTINCT(ssc_name), ',') AS suburb,
                    string_agg(DISTINCT(lga_name11), ', ') AS lga
               FROM {schema}.raw_indicators_hard
              WHERE sa1_7dig11 IN (SELECT sa1_7dig11 FROM abs_2011_irsd)
              GROUP BY sa1_7dig11
              ORDER BY sa1_7dig11 ASC;"
        ),
        format!("DROP TABLE IF EXISTS {schema}.sa2_area;"),
        format!(
            "CREATE TABLE {schema}.sa2_area AS
             SELECT sa2_name11,
                    string_agg(DISTINCT(ssc_name), ',') AS suburb,
                    string_agg(DISTINCT(lga_name11), ', ') AS lga
               FROM {schema}.raw_indicators_hard
              GROUP BY sa2_name11
              ORDER BY sa2_name11 ASC;"
        ),
        format!("DROP TABLE IF EXISTS {schema}.ssc_area;"),
        format!(
            "CREATE TABLE {schema}.ssc_area AS
             SELECT DISTINCT(ssc_name) AS suburb,
                    string_agg(DISTINCT(lga_name11), ', ') AS lga
               FROM {schema}.raw_indicators_hard
              GROUP BY ssc_name
              ORDER BY ssc_name ASC;"
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::sample_config;

    #[test]
    fn sixteen_indicators_with_unique_aliases() {
        let config = sample_config();
        let list = indicators(&config, "hard");
        assert_eq!(list.len(), 16);
        let mut aliases: Vec<&str> = list.iter().map(|i| i.alias.as_str()).collect();
        aliases.sort_unstable();
        aliases.dedup();
        assert_eq!(aliases.len(), 16);
    }

    #[test]
    fn air_quality_is_the_only_negative_indicator() {
        let config = sample_config();
        let negatives: Vec<String> = indicators(&config, "soft")
            .into_iter()
            .filter(|i| !i.positive)
            .map(|i| i.alias)
            .collect();
        assert_eq!(negatives, vec!["air_no2".to_string()]);
    }

    #[test]
    fn form_selects_the_access_source() {
        let config = sample_config();
        let hard = indicators(&config, "hard");
        let pos = hard.iter().find(|i| i.alias == "pos15000_access").unwrap();
        assert_eq!(pos.column, "pos_greq15000m2_in_400m_hard");
        let soft = indicators(&config, "soft");
        let pt = soft.iter().find(|i| i.alias == "busstop2012_400m").unwrap();
        assert_eq!(pt.table, "ind_dest_soft");
    }

    #[test]
    fn no2_joins_on_meshblock_with_flipped_polarity() {
        let config = sample_config();
        let list = indicators(&config, "hard");
        let no2 = list.iter().find(|i| i.alias == "air_no2").unwrap();
        assert!(no2.meshblock_join);
        assert_eq!(no2.table, "no2_pred");
    }

    #[test]
    fn summaries_weight_meshblock_sources_per_parcel() {
        let builder = UliBuilder::new(&sample_config(), "hard");
        let create = builder.raw_summary_table("AVG").pop().unwrap();
        assert!(create
            .contains("FROM parcelmb LEFT JOIN no2_pred ON parcelmb.mb_code11 = no2_pred.mb_code11"));
        // every indicator's summary, the joined one included, filters the
        // excluded parcels
        assert_eq!(create.matches("NOT IN (SELECT DISTINCT").count(), 16);
    }
}
